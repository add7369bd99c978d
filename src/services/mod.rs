//! Domain services consumed by the HTTP routes and the chat assistant.

mod conversations;
mod machines;
mod sensors;

pub use conversations::{
    conversation_title, parse_conversation_id, ConversationQuery, ConversationService,
    DEFAULT_CONVERSATION_LIMIT, MAX_CONVERSATION_LIMIT, TITLE_MAX_CHARS,
};
pub use machines::{MachineRegistry, LATEST_READINGS};
pub use sensors::{
    parse_machine_id, SensorService, DEFAULT_LIST_LIMIT, DEFAULT_STATS_HOURS, MAX_LIST_LIMIT,
    MAX_STATS_HOURS,
};
