pub mod blowup;
pub mod exponential_decay;
pub mod exponential_decay_with_algebraic;
pub mod heat1d;
