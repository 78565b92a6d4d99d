//! §4.E Kitty Graphics Protocol wire codec: command encoding, response
//! parsing, and tmux passthrough wrapping.

pub mod command;
pub mod response;
pub mod tmux;

pub use command::{
    DeleteCommand, DeleteTarget, Format, Medium, PlacementData, PutCommand, Quietness,
    TransmitCommand,
};
pub use response::{GraphicsResponse, parse_response};
pub use tmux::escape_tmux;
