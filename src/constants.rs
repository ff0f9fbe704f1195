//! Configuration constants for the quizroom session core
//!
//! This module contains the limits and fixed timings used throughout the
//! session state machine so that every boundary lives in one place.

/// Quiz content limits
pub mod quiz {
    /// Maximum number of questions allowed in a single quiz
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a quiz title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum length of a question prompt in characters
    pub const MAX_PROMPT_LENGTH: usize = 200;
    /// Minimum number of answer options per question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options per question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single answer option in characters
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Minimum time limit in whole seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 1;
    /// Maximum time limit in whole seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 240;
}

/// Session membership limits
pub mod session {
    /// Maximum number of players in a single session
    pub const MAX_PLAYER_COUNT: usize = 1000;
    /// Maximum length of a player display name in characters
    pub const MAX_NAME_LENGTH: usize = 40;
}

/// Scoring parameters
pub mod scoring {
    /// Points awarded for any correct answer regardless of speed
    pub const BASE_POINTS: u64 = 1000;
    /// Maximum additional points awarded for answering instantly
    pub const MAX_SPEED_BONUS: u64 = 500;
}

/// Fixed server-side delays driving phase transitions
pub mod timing {
    use web_time::Duration;

    /// Delay between the game-started broadcast and the first question
    pub const QUESTION_COUNTDOWN: Duration = Duration::from_secs(3);
    /// How long per-question results stay on screen before advancing
    pub const RESULTS_DISPLAY: Duration = Duration::from_secs(5);
    /// Grace period between a session ending and its eviction, allowing
    /// late result polling
    pub const EVICTION_GRACE: Duration = Duration::from_secs(30);
}
