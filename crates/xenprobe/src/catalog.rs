//! The test catalog.

use xenprobe_core::{ConsoleTest, PingAddressTest, PingTest, Test, TestEnv};

/// Every known test, in run order.
pub fn all_tests(env: &TestEnv) -> Vec<Box<dyn Test>> {
    vec![
        Box::new(ConsoleTest::hello_world(env.clone())),
        Box::new(ConsoleTest::sleep_and_time(env.clone())),
        Box::new(ConsoleTest::read_from_console(env.clone())),
        Box::new(PingTest::new(env.clone())),
        Box::new(PingAddressTest::new(env.clone())),
    ]
}

/// Keep only the test called `name`.
pub fn select(tests: Vec<Box<dyn Test>>, name: &str) -> Option<Box<dyn Test>> {
    tests.into_iter().find(|t| t.name() == name)
}
