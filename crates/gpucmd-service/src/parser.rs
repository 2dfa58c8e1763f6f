//! Command parser.
//!
//! Walks the ring from `get` towards `put`, one command at a time. Every read
//! of the ring is a single bounded copy: the header word first, then the
//! whole command, which the handler only ever sees as that private copy.

use std::sync::Arc;

use gpucmd_ipc::SharedRegion;
use gpucmd_protocol::{CbError, CommandHeader, CommandInfo, ENTRY_SIZE};
use tracing::trace;

use crate::command_buffer::CommandBufferEngine;

/// The API-specific half of command processing.
pub trait AsyncApiHandler {
    /// Argument rules for `command`, or `None` if it is not a known command.
    fn command_info(&self, command: u32) -> Option<CommandInfo>;

    /// Executes one command. `args` holds the `arg_count` entries following
    /// the header; `immediate_data_size` is the payload size in bytes past
    /// the fixed arguments.
    fn do_command(
        &mut self,
        engine: &mut dyn CommandBufferEngine,
        command: u32,
        args: &[u32],
        immediate_data_size: u32,
    ) -> CbError;

    fn command_name(&self, command: u32) -> &'static str;
}

pub struct CommandParser {
    ring: Arc<SharedRegion>,
    num_entries: i32,
    get: i32,
    put: i32,
}

impl CommandParser {
    pub fn new(ring: Arc<SharedRegion>, num_entries: i32) -> Self {
        Self {
            ring,
            num_entries,
            get: 0,
            put: 0,
        }
    }

    pub fn get(&self) -> i32 {
        self.get
    }

    pub fn put(&self) -> i32 {
        self.put
    }

    pub fn num_entries(&self) -> i32 {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.get == self.put
    }

    /// Fails, leaving `put` unchanged, when `put` is outside the ring.
    pub fn set_put(&mut self, put: i32) -> bool {
        if put < 0 || put >= self.num_entries {
            return false;
        }
        self.put = put;
        true
    }

    fn read_entries(&self, offset: i32, count: u32) -> Option<Vec<u32>> {
        self.ring
            .read_words(offset as usize * ENTRY_SIZE, count as usize)
            .ok()
    }

    /// Processes the command at `get`.
    ///
    /// Structural faults (zero size, command running past the ring end or
    /// past `put`) leave `get` where it is. Otherwise `get` advances past the
    /// command unless the handler answered `LostContext` or `Waiting`.
    pub fn process_command<H: AsyncApiHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        engine: &mut dyn CommandBufferEngine,
    ) -> CbError {
        if self.is_empty() {
            return CbError::NoError;
        }

        let Some(header) = self.read_entries(self.get, 1) else {
            return CbError::OutOfBounds;
        };
        let header = CommandHeader::from_word(header[0]);
        if header.size == 0 {
            return CbError::InvalidSize;
        }

        let end = i64::from(self.get) + i64::from(header.size);
        if end > i64::from(self.num_entries) {
            return CbError::OutOfBounds;
        }
        if self.put > self.get && end > i64::from(self.put) {
            return CbError::OutOfBounds;
        }

        let Some(words) = self.read_entries(self.get, header.size) else {
            return CbError::OutOfBounds;
        };
        let args = &words[1..];

        let result = match handler.command_info(header.command) {
            None => CbError::UnknownCommand,
            Some(info) => match info.immediate_data_size(header.arg_count()) {
                None => CbError::InvalidArguments,
                Some(immediate_data_size) => {
                    trace!(
                        command = handler.command_name(header.command),
                        get = self.get,
                        size = header.size,
                        "dispatch"
                    );
                    handler.do_command(engine, header.command, args, immediate_data_size)
                }
            },
        };

        if !matches!(result, CbError::LostContext | CbError::Waiting) {
            let next = end as i32;
            self.get = if next == self.num_entries { 0 } else { next };
        }
        result
    }

    /// Processes commands until the ring is empty or a command answers
    /// anything other than `NoError`.
    pub fn process_all_commands<H: AsyncApiHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        engine: &mut dyn CommandBufferEngine,
    ) -> CbError {
        while !self.is_empty() {
            let result = self.process_command(handler, engine);
            if result != CbError::NoError {
                return result;
            }
        }
        CbError::NoError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::TransferBuffer;
    use gpucmd_ipc::SharedMemoryRegistry;
    use gpucmd_protocol::{CommandEncoder, CommandWriter};
    use proptest::prelude::*;

    #[derive(Default)]
    struct Engine {
        token: i32,
    }

    impl CommandBufferEngine for Engine {
        fn get_shared_memory_buffer(&self, _shm_id: i32) -> Option<TransferBuffer> {
            None
        }
        fn set_token(&mut self, token: i32) {
            self.token = token;
        }
        fn get_get_offset(&self) -> i32 {
            0
        }
        fn set_get_offset(&mut self, _offset: i32) -> bool {
            true
        }
    }

    /// Accepts commands 0..=3 with at least `id` args and answers with the
    /// queued result.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<(u32, Vec<u32>, u32)>,
        next_result: Option<CbError>,
    }

    impl AsyncApiHandler for Recorder {
        fn command_info(&self, command: u32) -> Option<CommandInfo> {
            (command <= 3).then(|| CommandInfo::at_least(command))
        }
        fn do_command(
            &mut self,
            _engine: &mut dyn CommandBufferEngine,
            command: u32,
            args: &[u32],
            immediate_data_size: u32,
        ) -> CbError {
            self.seen.push((command, args.to_vec(), immediate_data_size));
            self.next_result.take().unwrap_or(CbError::NoError)
        }
        fn command_name(&self, _command: u32) -> &'static str {
            "test"
        }
    }

    fn parser_with(words: &[u32], entries: i32) -> CommandParser {
        let registry = SharedMemoryRegistry::new();
        let region = registry
            .open(registry.create(entries as usize * 4).unwrap())
            .unwrap();
        region.write_words(0, words).unwrap();
        CommandParser::new(region, entries)
    }

    fn header(command: u32, size: u32) -> u32 {
        CommandHeader::new(command, size).to_word()
    }

    #[test]
    fn empty_queue_is_a_no_op() {
        let mut parser = parser_with(&[], 8);
        let mut handler = Recorder::default();
        assert_eq!(parser.process_command(&mut handler, &mut Engine::default()), CbError::NoError);
        assert!(handler.seen.is_empty());
        assert_eq!(parser.get(), 0);
    }

    #[test]
    fn set_put_rejects_out_of_range() {
        let mut parser = parser_with(&[], 8);
        assert!(parser.set_put(7));
        assert!(!parser.set_put(8));
        assert!(!parser.set_put(-1));
        assert_eq!(parser.put(), 7);
    }

    #[test]
    fn dispatches_args_and_immediate_size() {
        let mut parser = parser_with(&[header(2, 4), 10, 20, 30], 8);
        let mut handler = Recorder::default();
        parser.set_put(4);
        assert_eq!(parser.process_all_commands(&mut handler, &mut Engine::default()), CbError::NoError);
        assert_eq!(handler.seen, vec![(2, vec![10, 20, 30], 4)]);
        assert_eq!(parser.get(), 4);
    }

    #[test]
    fn zero_size_does_not_advance() {
        let mut parser = parser_with(&[header(1, 0)], 8);
        parser.set_put(1);
        let mut handler = Recorder::default();
        assert_eq!(parser.process_command(&mut handler, &mut Engine::default()), CbError::InvalidSize);
        assert_eq!(parser.get(), 0);
    }

    #[test]
    fn command_past_put_is_out_of_bounds() {
        let mut parser = parser_with(&[header(1, 3), 0, 0], 8);
        parser.set_put(2);
        let mut handler = Recorder::default();
        assert_eq!(parser.process_command(&mut handler, &mut Engine::default()), CbError::OutOfBounds);
        assert_eq!(parser.get(), 0);
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn decode_errors_still_advance() {
        // Unknown command, then a command with too few args, then a good one.
        let mut parser = parser_with(&[header(9, 1), header(3, 2), 0, header(0, 1)], 8);
        parser.set_put(4);
        let mut handler = Recorder::default();
        let mut engine = Engine::default();
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::UnknownCommand);
        assert_eq!(parser.get(), 1);
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::InvalidArguments);
        assert_eq!(parser.get(), 3);
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::NoError);
        assert_eq!(parser.get(), 4);
        assert_eq!(handler.seen.len(), 1);
    }

    #[test]
    fn waiting_and_lost_hold_the_cursor() {
        let mut parser = parser_with(&[header(0, 1)], 8);
        parser.set_put(1);
        let mut handler = Recorder {
            next_result: Some(CbError::Waiting),
            ..Recorder::default()
        };
        let mut engine = Engine::default();
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::Waiting);
        assert_eq!(parser.get(), 0);
        handler.next_result = Some(CbError::LostContext);
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::LostContext);
        assert_eq!(parser.get(), 0);
        assert_eq!(parser.process_command(&mut handler, &mut engine), CbError::NoError);
        assert_eq!(parser.get(), 1);
    }

    #[test]
    fn wraps_to_zero_at_ring_end() {
        let mut w = CommandWriter::new();
        w.noop(1);
        w.noop(1);
        let mut words = w.finish();
        words.splice(0..0, [header(0, 1), header(0, 1)]);
        let mut parser = parser_with(&words, 6);
        assert!(parser.set_put(4));
        let mut handler = Recorder::default();
        let mut engine = Engine::default();
        assert_eq!(parser.process_all_commands(&mut handler, &mut engine), CbError::NoError);
        // Publish a put behind get: the remaining two entries run to the end
        // of the ring and the cursor wraps.
        assert!(parser.set_put(0));
        assert_eq!(parser.process_all_commands(&mut handler, &mut engine), CbError::NoError);
        assert_eq!(parser.get(), 0);
        assert_eq!(handler.seen.len(), 4);
    }

    proptest! {
        #[test]
        fn garbage_never_moves_the_cursor_out_of_the_ring(
            words in proptest::collection::vec(any::<u32>(), 1..64),
            put in 0i32..64,
        ) {
            let mut parser = parser_with(&words, 64);
            prop_assert!(parser.set_put(put));
            let mut handler = Recorder::default();
            let mut engine = Engine::default();
            for _ in 0..128 {
                if parser.is_empty() {
                    break;
                }
                let before = parser.get();
                let result = parser.process_command(&mut handler, &mut engine);
                prop_assert!((0..64).contains(&parser.get()));
                if matches!(result, CbError::InvalidSize | CbError::OutOfBounds) {
                    prop_assert_eq!(parser.get(), before);
                    break;
                }
            }
        }
    }
}
