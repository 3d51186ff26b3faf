pub mod autoclose;
pub mod gates;
pub mod kill_switch;

pub use autoclose::{
    evaluate as evaluate_auto_close, evaluate_and_persist as evaluate_and_persist_auto_close,
    AutoCloseConfig, AutoCloseDecision, AutoCloseError, AutoCloseInputs, AutoCloseOutcome,
};
pub use gates::{bounds_gate, enable_side_gate, floor_price_gate, GateRejection};
pub use kill_switch::{
    disable as disable_kill_switch, enable as enable_kill_switch, enforce_for_bot as enforce_kill_switch_for_bot,
    KillSwitchError, KillSwitchSweepResult,
};
