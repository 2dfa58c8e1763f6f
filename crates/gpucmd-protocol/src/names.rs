use std::collections::HashMap;

use crate::common::CommonCommand;
use crate::gles2::CommandId;

/// Opcode → name lookup used for diagnostics.
///
/// Built once by whoever owns the service and handed to the decoders that
/// log; unknown ids resolve to `"<unknown>"`.
#[derive(Clone, Debug)]
pub struct CommandNames {
    names: HashMap<u32, &'static str>,
}

impl CommandNames {
    pub const UNKNOWN: &'static str = "<unknown>";

    pub fn new() -> Self {
        let mut names = HashMap::with_capacity(CommonCommand::ALL.len() + CommandId::ALL.len());
        for cmd in CommonCommand::ALL {
            names.insert(cmd as u32, cmd.name());
        }
        for cmd in CommandId::ALL {
            names.insert(cmd.id(), cmd.name());
        }
        Self { names }
    }

    pub fn get(&self, command: u32) -> &'static str {
        self.names.get(&command).copied().unwrap_or(Self::UNKNOWN)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for CommandNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_and_gles2_ids() {
        let names = CommandNames::new();
        assert_eq!(names.get(CommonCommand::SetToken as u32), "SetToken");
        assert_eq!(names.get(CommandId::DrawElements.id()), "DrawElements");
        assert_eq!(names.get(200), CommandNames::UNKNOWN);
        assert_eq!(names.len(), CommonCommand::ALL.len() + CommandId::ALL.len());
    }
}
