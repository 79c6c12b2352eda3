//! Expectations that a specific command is executed or event recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use rehearsal_engine::{
    Envelope, Fact, HandlerConfig, HandlerEnablement, HandlerType, Message, MessageRole,
    MessageType, Payload,
};

use super::{Expectation, ExpectationResult, PredicateOptions, MESSAGE_DIFF};
use crate::compare::{similarity, Comparator, DefaultComparator, Similarity};
use crate::render::{write_diff, Renderer};

/// Expect `command` to be executed by some handler.
pub fn to_execute_command<M: Message>(command: M) -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(Target::Value(Arc::new(command)), MessageRole::Command))
}

/// Expect `event` to be recorded by some handler.
pub fn to_record_event<M: Message>(event: M) -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(Target::Value(Arc::new(event)), MessageRole::Event))
}

/// Expect any command of type `M` to be executed.
pub fn to_execute_command_of_type<M: Message>() -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(Target::Type(MessageType::of::<M>()), MessageRole::Command))
}

/// Expect any event of type `M` to be recorded.
pub fn to_record_event_of_type<M: Message>() -> Box<dyn Expectation> {
    Box::new(MessageExpectation::new(Target::Type(MessageType::of::<M>()), MessageRole::Event))
}

enum Target {
    Value(Payload),
    Type(MessageType),
}

impl Target {
    fn message_type(&self) -> MessageType {
        match self {
            Target::Value(m) => m.message_type(),
            Target::Type(t) => *t,
        }
    }
}

/// Wording that differs between commands and events.
struct Vocabulary {
    noun: &'static str,
    present: &'static str,
    verb: &'static str,
    nothing_produced: &'static str,
    action: &'static str,
    expectation: &'static str,
    relevant: &'static [HandlerType],
    relevant_list: &'static str,
    relevant_plural: &'static str,
}

const COMMAND: Vocabulary = Vocabulary {
    noun: "command",
    present: "execute",
    verb: "executed",
    nothing_produced: "no commands were executed at all",
    action: "execute a command",
    expectation: "to_execute_command",
    relevant: &[HandlerType::Process],
    relevant_list: "process",
    relevant_plural: "processes",
};

const EVENT: Vocabulary = Vocabulary {
    noun: "event",
    present: "record",
    verb: "recorded",
    nothing_produced: "no events were recorded at all",
    action: "record an event",
    expectation: "to_record_event",
    relevant: &[HandlerType::Aggregate, HandlerType::Integration],
    relevant_list: "aggregate and integration",
    relevant_plural: "aggregates or integrations",
};

fn vocabulary(role: MessageRole) -> &'static Vocabulary {
    match role {
        MessageRole::Command => &COMMAND,
        _ => &EVENT,
    }
}

struct MessageExpectation {
    target: Target,
    role: MessageRole,
    comparator: Arc<dyn Comparator>,
    options: PredicateOptions,

    ok: bool,
    best: Option<(Envelope, Similarity)>,
    /// An equal message produced in the other role.
    misrouted: Option<Envelope>,
    commands: usize,
    events: usize,
    enabled: HandlerEnablement,
    engaged: BTreeMap<String, HandlerType>,
}

impl MessageExpectation {
    fn new(target: Target, role: MessageRole) -> Self {
        Self {
            target,
            role,
            comparator: Arc::new(DefaultComparator),
            options: PredicateOptions::default(),
            ok: false,
            best: None,
            misrouted: None,
            commands: 0,
            events: 0,
            enabled: HandlerEnablement::default(),
            engaged: BTreeMap::new(),
        }
    }

    fn words(&self) -> &'static Vocabulary {
        vocabulary(self.role)
    }

    fn criteria(&self) -> String {
        let w = self.words();
        match &self.target {
            Target::Value(m) => format!(
                "{} a specific '{}' {}",
                w.present,
                m.message_type(),
                w.noun
            ),
            Target::Type(t) => format!("{} any '{}' {}", w.present, t, w.noun),
        }
    }

    fn similarity_to(&self, env: &Envelope) -> Similarity {
        match &self.target {
            Target::Value(expected) => similarity(&*self.comparator, &**expected, &*env.message),
            Target::Type(t) if *t == env.message_type() => Similarity::Equal,
            Target::Type(_) => Similarity::DifferentType,
        }
    }

    fn consider(&mut self, env: &Envelope) {
        if self.ok || env.role == MessageRole::Timeout {
            return;
        }

        let sim = self.similarity_to(env);

        if env.role != self.role {
            if sim == Similarity::Equal && self.misrouted.is_none() {
                self.misrouted = Some(env.clone());
            }
            return;
        }

        if sim == Similarity::Equal {
            self.ok = true;
            self.best = Some((env.clone(), sim));
            return;
        }

        if let Target::Type(_) = self.target {
            return;
        }

        // Ties go to the first candidate seen.
        let better = match &self.best {
            None => true,
            Some((_, current)) => sim > *current,
        };
        if better {
            self.best = Some((env.clone(), sim));
        }
    }

    fn produced(&mut self, handler: &HandlerConfig, env: &Envelope) {
        match env.role {
            MessageRole::Command => self.commands += 1,
            MessageRole::Event => self.events += 1,
            MessageRole::Timeout => {}
        }
        if self.words().relevant.contains(&handler.handler_type()) {
            self.engaged
                .insert(handler.name().to_string(), handler.handler_type());
        }
        self.consider(env);
    }

    fn explain_misrouted(&self, result: &mut ExpectationResult, env: &Envelope) {
        let w = self.words();
        let other = vocabulary(env.role);

        result.explanation = format!(
            "the expected message was {} as {} {} by {}",
            other.verb,
            article(other.noun),
            other.noun,
            origin(env)
        );
        result.suggest(format_args!(
            "verify that {} intended to {} of this type",
            origin(env),
            other.action
        ));
        result.suggest(format_args!(
            "verify that {} is the correct expectation, did you mean {}?",
            w.expectation, other.expectation
        ));
    }

    fn explain_best_match(
        &self,
        result: &mut ExpectationResult,
        renderer: &dyn Renderer,
        env: &Envelope,
        sim: Similarity,
    ) {
        let w = self.words();

        if sim == Similarity::SameType {
            result.explanation = format!("a similar {} was {} by {}", w.noun, w.verb, origin(env));
            result.suggest("check the content of the message");
        } else {
            result.explanation = format!(
                "{} {} of a similar type was {} by {}",
                article(w.noun),
                w.noun,
                w.verb,
                origin(env)
            );
            result.suggest(format_args!(
                "check the message type, should it be {} rather than {}?",
                self.target.message_type(),
                env.message_type()
            ));
        }

        if let Target::Value(expected) = &self.target {
            let mut diff = String::new();
            write_diff(
                &mut diff,
                &renderer.render_message(&**expected),
                &renderer.render_message(&*env.message),
            );
            result.section(MESSAGE_DIFF).content = diff;
        }
    }

    fn explain_no_match(&self, result: &mut ExpectationResult) {
        let w = self.words();

        // A handler enabled by name counts for its type once it has run.
        let disabled: Vec<_> = w
            .relevant
            .iter()
            .filter(|t| !self.enabled.is_type_enabled(**t))
            .filter(|t| !self.engaged.values().any(|e| e == *t))
            .collect();

        if disabled.len() == w.relevant.len() {
            result.explanation = format!(
                "no relevant handler types ({}) were enabled",
                w.relevant_list
            );
            for t in disabled {
                result.suggest(format_args!(
                    "enable {t} handlers using the enable_handler_type() option"
                ));
            }
            return;
        }

        for t in disabled {
            result.suggest(format_args!(
                "enable {t} handlers using the enable_handler_type() option"
            ));
        }

        if self.engaged.is_empty() {
            result.explanation =
                format!("no relevant handlers ({}) were engaged", w.relevant_plural);
            result.suggest("check the application's routing configuration");
            return;
        }

        let of_role = match self.role {
            MessageRole::Command => self.commands,
            _ => self.events,
        };

        result.explanation = if self.commands + self.events == 0 {
            "no messages were produced at all".to_string()
        } else if of_role == 0 {
            w.nothing_produced.to_string()
        } else {
            format!(
                "none of the engaged handlers {} the expected {}",
                w.verb, w.noun
            )
        };

        for (name, handler_type) in &self.engaged {
            result.suggest(format_args!(
                "verify the logic within the '{name}' {handler_type} message handler"
            ));
        }
    }
}

impl Expectation for MessageExpectation {
    fn caption(&self) -> String {
        format!("to {}", self.criteria())
    }

    fn begin(&mut self, options: &PredicateOptions, comparator: Arc<dyn Comparator>) {
        self.options = *options;
        self.comparator = comparator;
        self.ok = false;
        self.best = None;
        self.misrouted = None;
        self.commands = 0;
        self.events = 0;
        self.enabled = HandlerEnablement::default();
        self.engaged.clear();
    }

    fn notify(&mut self, fact: &Fact) {
        match fact {
            Fact::UnroutableMessageDispatched { enabled, .. }
            | Fact::MessageDispatchBegun { enabled, .. }
            | Fact::TickCycleBegun { enabled, .. } => {
                self.enabled = enabled.clone();
            }
            Fact::DispatchCycleBegun {
                envelopes, enabled, ..
            } => {
                self.enabled = enabled.clone();
                if self.options.match_dispatch_cycle_started_facts {
                    for env in envelopes {
                        self.consider(env);
                    }
                }
            }
            Fact::MessageHandlingBegun { handler, .. } => {
                if self.words().relevant.contains(&handler.handler_type()) {
                    self.engaged
                        .insert(handler.name().to_string(), handler.handler_type());
                }
            }
            Fact::EventRecorded { handler, event, .. } => self.produced(handler, event),
            Fact::CommandExecuted {
                handler, command, ..
            } => self.produced(handler, command),
            _ => {}
        }
    }

    fn end(&mut self, renderer: &dyn Renderer) -> ExpectationResult {
        let mut result = ExpectationResult::new(self.ok, self.criteria());
        if self.ok {
            return result;
        }

        if let Some(env) = &self.misrouted {
            self.explain_misrouted(&mut result, env);
        } else if let Some((env, sim)) = &self.best {
            self.explain_best_match(&mut result, renderer, env, *sim);
        } else {
            self.explain_no_match(&mut result);
        }

        result
    }
}

fn article(noun: &str) -> &'static str {
    match noun.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

fn origin(env: &Envelope) -> String {
    match &env.origin {
        Some(o) => format!(
            "the '{}' {} message handler",
            o.handler.name, o.handler_type
        ),
        None => "the test".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rehearsal_engine::testing::*;
    use rehearsal_engine::{
        Application, Context, Engine, Envelope, Fact, MessageId, OperationOptions, Origin,
    };

    use crate::render::DefaultRenderer;

    const APP_KEY: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

    fn run(
        app: &Application,
        options: OperationOptions,
        mut expectation: Box<dyn Expectation>,
        message: Payload,
    ) -> ExpectationResult {
        let mut engine = Engine::new(app);
        expectation.begin(&PredicateOptions::default(), Arc::new(DefaultComparator));
        let observer = crate::expectation::ExpectationObserver::new(expectation);
        let options = options.with_observer(observer.clone());
        let _ = engine.dispatch_payload(&Context::background(), message, &options);
        observer.end(&DefaultRenderer)
    }

    fn at() -> OperationOptions {
        OperationOptions::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    /// CommandA records one EventA per comma-separated value, or EventB
    /// values prefixed with "b:".
    fn app() -> Application {
        Application::builder("<app>", APP_KEY)
            .aggregate(
                AggregateHandlerStub::new(|c| {
                    c.identity("<aggregate>", KEY_AGGREGATE)
                        .handles_command::<CommandA>()
                        .records_event::<EventA>()
                        .records_event::<EventB>();
                })
                .route_with(|_| Ok("<instance>".into()))
                .handle_with(|s, m| {
                    let value = value_of(m).unwrap_or_default();
                    for v in value.split(',').filter(|v| !v.is_empty()) {
                        match v.strip_prefix("b:") {
                            Some(b) => s.record_event(EventB::new(b)),
                            None => s.record_event(EventA::new(v)),
                        }
                    }
                    Ok(())
                }),
            )
            .integration(IntegrationHandlerStub::new(|c| {
                c.identity("<integration>", KEY_INTEGRATION)
                    .handles_command::<CommandB>()
                    .records_event::<EventX>();
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn passes_when_an_equal_event_is_recorded() {
        let result = run(
            &app(),
            at(),
            to_record_event(EventA::new("2")),
            Arc::new(CommandA::new("1,2")),
        );
        assert!(result.ok, "{result}");
        assert_eq!(result.criteria, "record a specific 'EventA' event");
    }

    #[test]
    fn best_match_prefers_same_type_over_different_type() {
        let result = run(
            &app(),
            at(),
            to_record_event(EventA::new("1")),
            Arc::new(CommandA::new("b:9,2")),
        );

        assert!(!result.ok);
        assert_eq!(
            result.explanation,
            "a similar event was recorded by the '<aggregate>' aggregate message handler"
        );
        let section = result.sections.iter().find(|s| s.title == MESSAGE_DIFF);
        let diff = &section.unwrap().content;
        assert!(diff.contains("-   \"value\": \"1\""), "{diff}");
        assert!(diff.contains("+   \"value\": \"2\""), "{diff}");
    }

    #[test]
    fn reports_a_similar_type_when_nothing_of_the_type_was_recorded() {
        let result = run(
            &app(),
            at(),
            to_record_event(EventA::new("1")),
            Arc::new(CommandA::new("b:1")),
        );

        assert_eq!(
            result.explanation,
            "an event of a similar type was recorded by the '<aggregate>' aggregate message handler"
        );
        assert!(result.sections.iter().any(|s| s.title == MESSAGE_DIFF));
    }

    #[test]
    fn reports_when_nothing_was_produced() {
        let result = run(
            &app(),
            at(),
            to_record_event(EventA::new("1")),
            Arc::new(CommandA::new("")),
        );

        assert_eq!(result.explanation, "no messages were produced at all");
        assert_eq!(
            result.sections[0].content,
            "• enable integration handlers using the enable_handler_type() option\n\
             • verify the logic within the '<aggregate>' aggregate message handler\n"
        );
    }

    #[test]
    fn reports_when_no_relevant_handler_was_engaged() {
        let result = run(
            &app(),
            at(),
            to_record_event(EventA::new("1")),
            Arc::new(CommandX::new("1")),
        );

        assert_eq!(
            result.explanation,
            "no relevant handlers (aggregates or integrations) were engaged"
        );
    }

    #[test]
    fn reports_when_no_relevant_handler_type_was_enabled() {
        let options = at()
            .enable_handler_type(HandlerType::Aggregate, false)
            .enable_handler_type(HandlerType::Integration, false);
        let result = run(
            &app(),
            options,
            to_record_event(EventA::new("1")),
            Arc::new(CommandA::new("1")),
        );

        assert_eq!(
            result.explanation,
            "no relevant handler types (aggregate and integration) were enabled"
        );
    }

    #[test]
    fn handler_enabled_by_name_counts_for_its_type() {
        let options = at()
            .enable_handler_type(HandlerType::Aggregate, false)
            .enable_handler("<aggregate>", true);
        let result = run(
            &app(),
            options,
            to_record_event(EventA::new("1")),
            Arc::new(CommandA::new("")),
        );

        assert_eq!(result.explanation, "no messages were produced at all");
        assert_eq!(
            result.sections[0].content,
            "• enable integration handlers using the enable_handler_type() option\n\
             • verify the logic within the '<aggregate>' aggregate message handler\n"
        );
    }

    #[test]
    fn reports_an_equal_message_in_the_wrong_role() {
        let mut e = MessageExpectation::new(
            Target::Value(Arc::new(EventA::new("1"))),
            MessageRole::Event,
        );
        e.begin(&PredicateOptions::default(), Arc::new(DefaultComparator));

        let app = Application::builder("<app>", APP_KEY)
            .process(ProcessHandlerStub::new(|c| {
                c.identity("<process>", KEY_PROCESS)
                    .handles_event::<EventB>()
                    .executes_command::<CommandA>();
            }))
            .build()
            .unwrap();
        let handler = app.handler("<process>").unwrap().clone();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cause = Envelope::new_root(
            MessageId(1),
            Arc::new(EventB::new("1")),
            MessageRole::Event,
            now,
        )
        .unwrap();
        let command = cause.new_child(
            MessageId(2),
            Arc::new(EventA::new("1")),
            MessageRole::Command,
            now,
            Origin {
                handler: handler.identity().clone(),
                handler_type: HandlerType::Process,
                instance_id: Some("<instance>".into()),
            },
        );

        e.notify(&Fact::CommandExecuted {
            handler,
            instance_id: Some("<instance>".into()),
            envelope: cause,
            command,
        });
        let result = e.end(&DefaultRenderer);

        assert!(!result.ok);
        assert_eq!(
            result.explanation,
            "the expected message was executed as a command by the '<process>' process message handler"
        );
        let suggestions = &result.sections[0].content;
        assert!(suggestions.contains("verify that to_record_event is the correct expectation"));
        assert!(suggestions.contains("did you mean to_execute_command?"));
    }

    #[test]
    fn type_expectation_passes_for_any_value() {
        let result = run(
            &app(),
            at(),
            to_record_event_of_type::<EventA>(),
            Arc::new(CommandA::new("anything")),
        );
        assert!(result.ok, "{result}");
        assert_eq!(result.criteria, "record any 'EventA' event");
    }

    #[test]
    fn command_expectation_looks_to_processes() {
        let result = run(
            &app(),
            at(),
            to_execute_command(CommandB::new("1")),
            Arc::new(CommandA::new("1")),
        );
        assert_eq!(
            result.explanation,
            "no relevant handlers (processes) were engaged"
        );
    }
}
