//! Real-time exam-proctoring violation engine.
//!
//! Consumes per-frame perception results for an exam session and produces a
//! debounced violation snapshot per frame, while tracking and re-verifying
//! the exam-taker's identity.

pub mod detection {
    pub mod domain {
        pub mod detections;
        pub mod device_classes;
        pub mod face_landmarks;
        pub mod head_pose;
        pub mod overlap_filter;
        pub mod perception;
        pub mod person_tracker;
        pub mod signal_debouncer;
    }
    pub mod infrastructure;
}

pub mod identity {
    pub mod domain {
        pub mod embedding;
        pub mod identity_error;
        pub mod identity_matcher;
        pub mod identity_verifier;
        pub mod reference_set;
    }
    pub mod infrastructure;
}

pub mod violations {
    pub mod domain {
        pub mod violation;
        pub mod violation_recorder;
        pub mod violation_store;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod frame_logger;
    pub mod replay_executor;
    pub mod replay_use_case;
    pub mod report;
    pub mod session;
    pub mod session_registry;
    pub mod violation_orchestrator;
    pub mod infrastructure;
}

pub mod shared {
    pub mod bbox;
    pub mod config;
    pub mod constants;
    pub mod frame;
}
