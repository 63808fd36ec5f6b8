pub mod dual_quat;

pub use dual_quat::DualQuat;
