#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use helm_config::HelmConfig;
    use helm_core::{
        ActionRequest, ConversationMessage, Event, EventBus, HelmError, Result, Role, Surface,
        ToolAdapter, ToolError, ToolResult, ToolSpec,
    };
    use helm_device::{ArtifactStore, ConnectionHandle, Connector, ScreenBackend};
    use helm_llm::{MockModel, MockTurn};
    use helm_runtime::*;
    use parking_lot::Mutex;
    use serde_json::{Map, Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fakes ──────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeDesktop {
        connects: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FakeDesktop {
        fn surface(&self) -> Surface {
            Surface::Desktop
        }

        async fn connect(&self) -> Result<ConnectionHandle> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(ConnectionHandle::new(Surface::Desktop, "local"))
        }

        async fn release(&self, _handle: ConnectionHandle) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeScreen {
        calls: Mutex<Vec<String>>,
    }

    impl FakeScreen {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ScreenBackend for FakeScreen {
        async fn click(&self, x: i64, y: i64) -> Result<()> {
            self.calls.lock().push(format!("click {x},{y}"));
            Ok(())
        }

        async fn move_to(&self, x: i64, y: i64) -> Result<()> {
            self.calls.lock().push(format!("move {x},{y}"));
            Ok(())
        }

        async fn type_text(&self, text: &str) -> Result<()> {
            self.calls.lock().push(format!("type {text}"));
            Ok(())
        }

        async fn press_key(&self, key: &str) -> Result<()> {
            self.calls.lock().push(format!("key {key}"));
            Ok(())
        }

        async fn cursor_position(&self) -> Result<(i64, i64)> {
            Ok((0, 0))
        }

        async fn capture(&self, path: &Path) -> Result<()> {
            self.calls.lock().push("capture".into());
            tokio::fs::write(path, b"\x89PNG fake").await?;
            Ok(())
        }
    }

    /// Adapter whose actions either echo or fail without declaring it.
    struct EchoTool;

    #[async_trait]
    impl ToolAdapter for EchoTool {
        fn describe(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: "Echo back the text".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        fn surface(&self) -> Surface {
            Surface::Desktop
        }

        async fn execute(&self, action: &str, args: &Map<String, Value>) -> Result<ToolResult> {
            match action {
                "say" => Ok(ToolResult::output(
                    args.get("text").and_then(Value::as_str).unwrap_or_default(),
                )),
                "refuse" => Err(ToolError::InvalidArguments("nothing to say".into()).into()),
                _ => Err(HelmError::Unexpected("echo chamber collapsed".into())),
            }
        }
    }

    /// Records every callback in order.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl ConversationObserver for Recorder {
        fn on_content(&self, delta: &str) {
            self.log.lock().push(format!("content:{}", delta.trim()));
        }

        fn on_tool_call(&self, call: &ActionRequest) {
            self.log.lock().push(format!("call:{}", call.name));
        }

        fn on_tool_result(&self, name: &str, result: &ToolResult) {
            self.log
                .lock()
                .push(format!("result:{name}:{}", result.is_error()));
        }

        fn on_error(&self, _error: &HelmError) {
            self.log.lock().push("error".into());
        }
    }

    fn test_config() -> HelmConfig {
        let mut config = HelmConfig::default();
        config.screen.settle_delay_ms = 0;
        config.retry.delay_ms = 0;
        config
    }

    fn echo_loop(model: &Arc<MockModel>, config: &HelmConfig) -> ConversationLoop {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        ConversationLoop::new(
            model.clone(),
            Arc::new(registry),
            config.agent.clone(),
            "test prompt".into(),
            EventBus::default(),
        )
    }

    struct Harness {
        runtime: Runtime,
        model: Arc<MockModel>,
        screen: Arc<FakeScreen>,
        desktop: Arc<FakeDesktop>,
        _tmp: tempfile::TempDir,
    }

    fn runtime(model: MockModel) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let model = Arc::new(model);
        let screen = Arc::new(FakeScreen::default());
        let desktop = Arc::new(FakeDesktop::default());
        let runtime = Runtime::builder(test_config())
            .model(model.clone())
            .desktop(desktop.clone(), screen.clone())
            .artifacts(Arc::new(ArtifactStore::new(tmp.path())))
            .build()
            .unwrap();
        Harness {
            runtime,
            model,
            screen,
            desktop,
            _tmp: tmp,
        }
    }

    fn roles(history: &[ConversationMessage]) -> Vec<Role> {
        history.iter().map(|m| m.role).collect()
    }

    // ── Registry ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, HelmError::Config(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let args = |v: Value| v.as_object().cloned().unwrap();

        let ok = registry
            .dispatch("echo", &args(json!({"action": "say", "text": "hi"})))
            .await
            .unwrap();
        assert_eq!(ok.output.as_deref(), Some("hi"));

        let unknown = registry
            .dispatch("teleport", &args(json!({"action": "go"})))
            .await
            .unwrap();
        assert_eq!(unknown.error.as_deref(), Some("Invalid tool: teleport"));

        let missing = registry.dispatch("echo", &Map::new()).await.unwrap();
        assert!(missing.error.unwrap().contains("action"));

        let declared = registry
            .dispatch("echo", &args(json!({"action": "refuse"})))
            .await
            .unwrap();
        assert!(declared.error.unwrap().contains("nothing to say"));

        let fault = registry
            .dispatch("echo", &args(json!({"action": "explode"})))
            .await
            .unwrap_err();
        assert!(matches!(fault, HelmError::Unexpected(_)));
    }

    #[tokio::test]
    async fn test_dispatch_publishes_events() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut registry = ToolRegistry::new().with_events(events);
        registry.register(Arc::new(EchoTool)).unwrap();

        registry
            .dispatch("nope", json!({"action": "x"}).as_object().unwrap())
            .await
            .unwrap();
        match rx.try_recv().unwrap() {
            Event::ToolDispatched { name, is_error } => {
                assert_eq!(name, "nope");
                assert!(is_error);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // ── Conversation loop ──────────────────────────────────────

    #[tokio::test]
    async fn test_text_only_exchange() {
        let model = Arc::new(MockModel::new().with_text("Hello there."));
        let mut convo = echo_loop(&model, &test_config());

        let summary = convo.send("hi", &NoopObserver).await.unwrap();
        assert_eq!(summary.turns, 1);
        assert_eq!(summary.tool_calls, 0);
        assert_eq!(summary.text, "Hello there.");
        assert_eq!(roles(convo.history()), vec![Role::User, Role::Assistant]);
        assert_eq!(convo.phase(), LoopPhase::Idle);
    }

    #[tokio::test]
    async fn test_tool_result_fed_back_to_next_turn() {
        let model = Arc::new(
            MockModel::new()
                .with_tool_use("echo", json!({"action": "say", "text": "pong"}))
                .with_text("The tool said pong."),
        );
        let mut convo = echo_loop(&model, &test_config());

        let summary = convo.send("ping", &NoopObserver).await.unwrap();
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.tool_calls, 1);
        assert_eq!(summary.text, "The tool said pong.");

        let history = convo.history();
        assert_eq!(
            roles(history),
            vec![Role::User, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[1].turn, 0);
        assert_eq!(history[2].turn, 1);
        assert_eq!(
            history[1].tool_result().unwrap().output.as_deref(),
            Some("pong")
        );

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 2);
        assert_eq!(requests[0].system.as_deref(), Some("test prompt"));
        assert_eq!(requests[0].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_turn_indices_continue_across_sends() {
        let model = Arc::new(MockModel::new().with_text("one").with_text("two"));
        let mut convo = echo_loop(&model, &test_config());

        convo.send("first", &NoopObserver).await.unwrap();
        convo.send("second", &NoopObserver).await.unwrap();

        let turns: Vec<u32> = convo.history().iter().map(|m| m.turn).collect();
        assert_eq!(turns, vec![0, 0, 1, 1]);

        convo.clear();
        assert!(convo.history().is_empty());
    }

    #[tokio::test]
    async fn test_several_calls_in_one_turn() {
        let model = Arc::new(
            MockModel::new()
                .with_turn(
                    MockTurn::text("Doing both.")
                        .with_tool_use("echo", json!({"action": "say", "text": "a"}))
                        .with_tool_use("echo", json!({"action": "say", "text": "b"})),
                )
                .with_text("Done."),
        );
        let mut convo = echo_loop(&model, &test_config());

        let summary = convo.send("go", &NoopObserver).await.unwrap();
        assert_eq!(summary.tool_calls, 2);
        assert_eq!(summary.text, "Doing both.\n\nDone.");
        assert_eq!(
            roles(convo.history()),
            vec![Role::User, Role::Tool, Role::Tool, Role::Assistant, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_observer_sees_stream_order() {
        let model = Arc::new(
            MockModel::new()
                .with_turn(
                    MockTurn::text("Checking")
                        .with_tool_use("echo", json!({"action": "say", "text": "x"})),
                )
                .with_text("Fine"),
        );
        let mut convo = echo_loop(&model, &test_config());
        let recorder = Recorder::default();

        convo.send("go", &recorder).await.unwrap();
        assert_eq!(
            recorder.log(),
            vec![
                "content:Checking",
                "call:echo",
                "result:echo:false",
                "content:Fine"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let model = Arc::new(
            MockModel::new()
                .with_tool_use("teleport", json!({"action": "go"}))
                .with_text("That tool does not exist."),
        );
        let mut convo = echo_loop(&model, &test_config());

        let summary = convo.send("beam me up", &NoopObserver).await.unwrap();
        assert_eq!(summary.tool_calls, 1);
        let result = convo.history()[1].tool_result().unwrap();
        assert_eq!(result.error.as_deref(), Some("Invalid tool: teleport"));
    }

    #[tokio::test]
    async fn test_turn_limit_stops_loop() {
        let mut model = MockModel::new();
        for _ in 0..5 {
            model = model.with_tool_use("echo", json!({"action": "say", "text": "again"}));
        }
        let model = Arc::new(model);
        let mut config = test_config();
        config.agent.max_turns = 2;
        let mut convo = echo_loop(&model, &config);

        let summary = convo.send("loop forever", &NoopObserver).await.unwrap();
        assert_eq!(summary.turns, 2);
        assert_eq!(model.request_count(), 2);
        assert_eq!(convo.phase(), LoopPhase::Idle);
    }

    #[tokio::test]
    async fn test_tool_fault_keeps_history_and_reports() {
        let model = Arc::new(MockModel::new().with_turn(
            MockTurn::text("Let me try").with_tool_use("echo", json!({"action": "explode"})),
        ));
        let mut convo = echo_loop(&model, &test_config());
        let recorder = Recorder::default();

        let err = convo.send("break it", &recorder).await.unwrap_err();
        assert!(matches!(err, HelmError::Unexpected(_)));
        assert_eq!(convo.phase(), LoopPhase::Idle);
        assert_eq!(roles(convo.history()), vec![Role::User, Role::Assistant]);
        assert_eq!(convo.history()[1].text(), Some("Let me try"));
        assert_eq!(recorder.log().last().map(String::as_str), Some("error"));
    }

    #[tokio::test]
    async fn test_stream_error_keeps_partial_text() {
        let model = Arc::new(
            MockModel::new()
                .with_stream_error("Half a thought", "connection reset")
                .with_text("Recovered."),
        );
        let mut convo = echo_loop(&model, &test_config());

        let err = convo.send("talk", &NoopObserver).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(convo.history()[1].text(), Some("Half a thought"));
        assert_eq!(convo.phase(), LoopPhase::Idle);

        // The loop is usable again after a fault.
        let summary = convo.send("again", &NoopObserver).await.unwrap();
        assert_eq!(summary.text, "Recovered.");
    }

    #[tokio::test]
    async fn test_open_error_aborts_with_event() {
        let model = Arc::new(MockModel::new().with_error("overloaded"));
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut convo = ConversationLoop::new(
            model.clone(),
            Arc::new(ToolRegistry::new()),
            test_config().agent,
            "p".into(),
            events,
        );

        convo.send("hi", &NoopObserver).await.unwrap_err();
        assert!(matches!(rx.try_recv(), Ok(Event::TurnStarted { turn: 0 })));
        assert!(matches!(rx.try_recv(), Ok(Event::TurnAborted { turn: 0, .. })));
        assert_eq!(roles(convo.history()), vec![Role::User]);
    }

    // ── Runtime ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_builder_requires_model() {
        let err = Runtime::builder(test_config()).build().err().unwrap();
        assert!(matches!(err, HelmError::Config(_)));
    }

    #[tokio::test]
    async fn test_unsafe_request_is_refused_end_to_end() {
        let mut h = runtime(
            MockModel::new()
                .with_tool_use("desktop", json!({"action": "type", "text": "sudo rm -rf /"}))
                .with_text("I won't run that."),
        );

        let summary = h.runtime.send("wipe the disk", &NoopObserver).await.unwrap();
        assert_eq!(summary.text, "I won't run that.");

        let result = h.runtime.conversation().history()[1].tool_result().unwrap();
        assert!(result.error.as_ref().unwrap().contains("dangerous pattern"));
        assert!(h.screen.calls().is_empty());
        assert_eq!(h.desktop.connects.load(Ordering::SeqCst), 0);
        assert_eq!(h.model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_click_end_to_end() {
        let mut h = runtime(
            MockModel::new()
                .with_tool_use("desktop", json!({"action": "click", "position": [10, 20]}))
                .with_text("Clicked."),
        );

        h.runtime.send("click the button", &NoopObserver).await.unwrap();
        assert_eq!(h.screen.calls(), vec!["click 10,20", "capture"]);

        let result = h.runtime.conversation().history()[1].tool_result().unwrap();
        assert!(result.image.is_some());
        assert!(!result.is_error());
        assert_eq!(h.runtime.registry().names(), vec!["desktop"]);
        assert!(h.runtime.conversation().system_prompt().contains("- desktop:"));
    }

    #[tokio::test]
    async fn test_initialize_and_teardown() {
        let h = runtime(MockModel::new());

        let ready = h.runtime.initialize().await;
        assert_eq!(ready, vec![(Surface::Desktop, true)]);
        assert!(h.runtime.device_states()[0].1.is_ready());

        h.runtime.teardown().await;
        assert_eq!(h.desktop.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!h.runtime.device_states()[0].1.is_ready());
    }

    #[tokio::test]
    async fn test_custom_system_prompt_wins() {
        let mut config = test_config();
        config.agent.system_prompt = Some("Be brief.".into());
        let runtime = Runtime::builder(config)
            .model(Arc::new(MockModel::new()))
            .build()
            .unwrap();
        assert_eq!(runtime.conversation().system_prompt(), "Be brief.");
        assert!(runtime.registry().is_empty());
    }
}
