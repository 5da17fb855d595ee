//! Task requests used by the end-to-end tests.

/// A create request submitted by the end-to-end tests.
#[derive(Debug, Clone, Copy)]
pub struct TaskFixture {
    pub animal: &'static str,
    pub text: &'static str,
    pub description: &'static str,
}

pub const TASK_FIXTURES: &[TaskFixture] = &[
    TaskFixture {
        animal: "dog",
        text: "WOOF",
        description: "short ASCII slogan",
    },
    TaskFixture {
        animal: "cat",
        text: "12345678",
        description: "text at the 8 character limit",
    },
    TaskFixture {
        animal: "red panda",
        text: "HI",
        description: "multi-word animal",
    },
    TaskFixture {
        animal: "owl",
        text: "ÜBER",
        description: "non-ASCII text counts characters, not bytes",
    },
];
