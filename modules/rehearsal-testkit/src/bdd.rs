//! Given/when/then scenarios on top of [`Test`].

use tracing::info;

use rehearsal_engine::Application;

use crate::action::Action;
use crate::error::TestError;
use crate::expectation::{Expectation, ExpectationResult};
use crate::test::{Test, TestOptions};

/// A described test: setup actions, an optional precondition, one action
/// and what it should cause.
pub struct Scenario {
    description: String,
    setup: Vec<Box<dyn Action>>,
    given: Option<(String, Box<dyn Action>)>,
    when: Option<(String, Box<dyn Action>)>,
    then: Option<(String, Box<dyn Expectation>)>,
}

impl Scenario {
    pub fn setup(description: impl Into<String>, actions: Vec<Box<dyn Action>>) -> Self {
        Self {
            description: description.into(),
            setup: actions,
            given: None,
            when: None,
            then: None,
        }
    }

    pub fn given(mut self, description: impl Into<String>, action: Box<dyn Action>) -> Self {
        self.given = Some((description.into(), action));
        self
    }

    pub fn when(mut self, description: impl Into<String>, action: Box<dyn Action>) -> Self {
        self.when = Some((description.into(), action));
        self
    }

    pub fn then(
        mut self,
        description: impl Into<String>,
        expectation: Box<dyn Expectation>,
    ) -> Self {
        self.then = Some((description.into(), expectation));
        self
    }

    /// Run the scenario, panicking if any step fails or the expectation is
    /// not met. Returns the test so it can be continued.
    pub fn test(self, app: &Application, options: TestOptions) -> Test {
        match self.run(app, options) {
            Ok((test, result)) if result.ok => test,
            Ok((_, result)) => panic!("--- TEST REPORT ---\n\n{result}"),
            Err(e) => panic!("scenario failed: {e}"),
        }
    }

    pub fn try_test(
        self,
        app: &Application,
        options: TestOptions,
    ) -> Result<ExpectationResult, TestError> {
        self.run(app, options).map(|(_, result)| result)
    }

    fn run(
        self,
        app: &Application,
        options: TestOptions,
    ) -> Result<(Test, ExpectationResult), TestError> {
        let Some((when, action)) = self.when else {
            return Err(TestError::IncompleteScenario { step: "when" });
        };
        let Some((then, expectation)) = self.then else {
            return Err(TestError::IncompleteScenario { step: "then" });
        };

        info!("--- SCENARIO {} ---", self.description);
        let mut test = Test::begin(app, options);

        for action in self.setup {
            test.try_prepare(action)?;
        }

        if let Some((given, action)) = self.given {
            info!("--- GIVEN {given} ---");
            test.try_prepare(action)?;
        }

        info!("--- WHEN {when} THEN {then} ---");
        let result = test.try_expect(action, expectation)?;
        Ok((test, result))
    }
}
