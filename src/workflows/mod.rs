pub mod turn;

pub use turn::{run_turn, TurnConfig, TurnError, TurnReport, TurnStatus};
