pub mod math;
pub mod pose_solver;
pub mod recorded_services;
