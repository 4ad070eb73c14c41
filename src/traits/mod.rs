pub mod board_reset;

pub use board_reset::{BoardReset, SysfsBoardReset, DEFAULT_RESET_NODE};

#[cfg(test)]
pub use board_reset::MockBoardReset;
