//! Directory REST handlers

pub mod conversations;
pub mod messages;

pub use conversations::{
    access_direct, add_member, create_group, delete_conversation, get_conversation,
    list_conversations, remove_member, rename_group, update_conversation,
};
pub use messages::{list_messages, send_message};
