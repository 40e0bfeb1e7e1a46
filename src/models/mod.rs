mod cartpole;

pub use cartpole::{CartPole, Formulation, PhysicalParams};
