//! Common commands: tokens and buckets.
//!
//! A bucket is a decoder-side byte array addressed by a client-chosen id,
//! used to move strings and other variable-size data in chunks.

use gpucmd_protocol::common::CommonCommand;
use gpucmd_protocol::CbError;

use super::{immediate_bytes, shm_read, shm_write, CmdResult, Gles2Decoder};
use crate::command_buffer::CommandBufferEngine;
use crate::surface::PlatformSurface;

/// Largest bucket a client may ask for.
pub(crate) const MAX_BUCKET_SIZE: u32 = 16 * 1024 * 1024;

impl<S: PlatformSurface> Gles2Decoder<S> {
    pub(super) fn do_common_command(
        &mut self,
        engine: &mut dyn CommandBufferEngine,
        command: CommonCommand,
        a: &[u32],
        immediate_data_size: u32,
    ) -> CmdResult {
        match command {
            CommonCommand::Noop => Ok(()),
            CommonCommand::SetToken => {
                engine.set_token(a[0] as i32);
                Ok(())
            }
            CommonCommand::SetBucketSize => self.set_bucket_size(a[0], a[1]),
            CommonCommand::SetBucketData => {
                let data = shm_read(engine, a[3], a[4], a[2])?;
                self.set_bucket_data(a[0], a[1], &data)
            }
            CommonCommand::SetBucketDataImmediate => {
                let data = immediate_bytes(&a[3..], immediate_data_size, a[2])?;
                self.set_bucket_data(a[0], a[1], &data)
            }
            CommonCommand::GetBucketSize => {
                let size = self.buckets.get(&a[0]).map_or(0, |b| b.len() as u32);
                shm_write(engine, a[1], a[2], &size.to_le_bytes())
            }
            CommonCommand::GetBucketData => {
                let (offset, size) = (a[1], a[2]);
                let bucket = self.buckets.get(&a[0]).ok_or(CbError::InvalidArguments)?;
                let end = offset.checked_add(size).ok_or(CbError::InvalidArguments)?;
                let data = bucket
                    .get(offset as usize..end as usize)
                    .ok_or(CbError::InvalidArguments)?;
                shm_write(engine, a[3], a[4], data)
            }
        }
    }

    /// Size `0` deletes the bucket.
    fn set_bucket_size(&mut self, bucket_id: u32, size: u32) -> CmdResult {
        if size > MAX_BUCKET_SIZE {
            return Err(CbError::InvalidArguments);
        }
        if size == 0 {
            self.buckets.remove(&bucket_id);
        } else {
            self.buckets.entry(bucket_id).or_default().resize(size as usize, 0);
        }
        Ok(())
    }

    fn set_bucket_data(&mut self, bucket_id: u32, offset: u32, data: &[u8]) -> CmdResult {
        let bucket = self.buckets.get_mut(&bucket_id).ok_or(CbError::InvalidArguments)?;
        let end = (offset as usize)
            .checked_add(data.len())
            .ok_or(CbError::InvalidArguments)?;
        let dst = bucket
            .get_mut(offset as usize..end)
            .ok_or(CbError::InvalidArguments)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Replaces a bucket with data produced by the service.
    pub(super) fn set_bucket(&mut self, bucket_id: u32, data: Vec<u8>) {
        self.buckets.insert(bucket_id, data);
    }

    pub fn bucket(&self, bucket_id: u32) -> Option<&[u8]> {
        self.buckets.get(&bucket_id).map(Vec::as_slice)
    }
}
