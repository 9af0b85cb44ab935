//! Agent output protocol: priority-tagged findings plus one control line.

pub mod control;
pub mod parser;

pub use control::{
    ArbiterDirective, ControlPayload, QueryRequest, CONTROL_PREFIX, LEGACY_MEMO_PREFIX,
};
pub use parser::{parse_agent_output, ParsedOutput};
