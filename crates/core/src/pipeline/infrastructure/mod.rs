pub mod parallel_replay_executor;
