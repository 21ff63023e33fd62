//! Integration tests: the sync controller driven with a fake clock.

use keymap_sync::controller::ParseResult;
use keymap_sync::storage::DEFAULT_TEMPLATE;
use keymap_sync::{
    parse, Action, CheckOptions, ConfigParser, DeviceInfo, DslParser, EngineConfig, FsProfileStore, LoadedConfig,
    Mapping, MemoryProfileStore, ParseOutcome, ProfileStore, Scope, StaticDeviceRegistry, StoreError, SyncController,
    SyncError, SyncState, VisualEdit, VisualModel, BASE_LAYER,
};
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Records every source it is asked to parse.
#[derive(Default)]
struct CountingParser {
    calls: RefCell<Vec<String>>,
}

impl CountingParser {
    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ConfigParser for CountingParser {
    fn parse(&self, source: &str, options: CheckOptions) -> ParseResult {
        self.calls.borrow_mut().push(source.to_string());
        DslParser.parse(source, options)
    }
}

/// Loads like a memory store but every save fails.
struct FailingStore(MemoryProfileStore);

impl ProfileStore for FailingStore {
    fn load_config(&self, profile: &str) -> Result<LoadedConfig, StoreError> {
        self.0.load_config(profile)
    }

    fn save_config(&self, _profile: &str, _source: &str, _expected_hash: &str) -> Result<String, StoreError> {
        Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only")))
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn open(source: &str, devices: Vec<DeviceInfo>) -> SyncController {
    let store = MemoryProfileStore::new().with_profile("default", source);
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "default", &StaticDeviceRegistry::new(devices)).expect("open");
    c
}

fn settle(c: &mut SyncController) {
    assert!(c.flush().is_some(), "expected pending text");
}

fn global_keys(model: &VisualModel) -> Vec<String> {
    model.global.base().keys.keys().map(str::to_string).collect()
}

fn serial(serial: &str) -> DeviceInfo {
    DeviceInfo {
        id: format!("dev-{}", serial),
        serial: Some(serial.to_string()),
        name: None,
        connected: true,
    }
}

// ==================== Debounce ====================

#[test]
fn test_debounce_burst_parses_once_with_final_text() {
    let store = MemoryProfileStore::new();
    let mut c = SyncController::with_parser(EngineConfig::default(), CountingParser::default());
    c.open(&store, "default", &StaticDeviceRegistry::default()).unwrap();
    let after_open = c.parser().calls().len();

    let t0 = Instant::now();
    let keystrokes = [
        (0, "map("),
        (100, "map(\"A\","),
        (200, "map(\"A\",\"B\")"),
        (550, "map(\"A\",\"B\");"),
    ];
    let mut first_parse_at = None;
    for tick in (0..=2000).step_by(10) {
        let now = t0 + ms(tick);
        if let Some((_, text)) = keystrokes.iter().find(|(at, _)| *at == tick) {
            c.edit_text(*text, now);
        }
        if c.run_due(now).is_some() && first_parse_at.is_none() {
            first_parse_at = Some(tick);
        }
    }

    let calls = c.parser().calls()[after_open..].to_vec();
    assert_eq!(calls, vec!["map(\"A\",\"B\");".to_string()]);
    assert_eq!(first_parse_at, Some(1050));
    assert_eq!(c.state(), SyncState::Clean);
    assert_eq!(global_keys(c.visual_model()), vec!["A"]);
}

#[test]
fn test_keystroke_restarts_debounce_window() {
    let mut c = open("", vec![]);
    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"B\");", t0);
    c.edit_text("map(\"A\", \"C\");", t0 + ms(400));
    assert!(c.poll(t0 + ms(600)).is_none());
    assert_eq!(c.deadline(), Some(t0 + ms(900)));
    assert!(c.poll(t0 + ms(900)).is_some());
}

#[test]
fn test_custom_debounce_from_config() {
    let config = EngineConfig::from_toml("debounce_ms = 100").unwrap();
    let mut c = SyncController::new(config);
    c.reset(
        "p",
        LoadedConfig {
            source: String::new(),
            hash: String::new(),
        },
        vec![],
    );
    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"B\");", t0);
    assert_eq!(c.run_due(t0 + ms(100)), Some(ParseOutcome::Applied));
}

// ==================== Stale results ====================

#[test]
fn test_stale_result_rejected_regardless_of_completion_order() {
    for newer_first in [true, false] {
        let mut c = open("", vec![]);
        let t0 = Instant::now();
        c.edit_text("map(\"A\", \"B\");", t0);
        let ticket_a = c.poll(t0 + ms(500)).unwrap();
        c.edit_text("map(\"C\", \"D\");", t0 + ms(600));
        let ticket_b = c.poll(t0 + ms(1100)).unwrap();

        let result_a = DslParser.parse(&ticket_a.source, CheckOptions::default());
        let result_b = DslParser.parse(&ticket_b.source, CheckOptions::default());
        if newer_first {
            assert_eq!(c.complete_parse(&ticket_b, result_b), ParseOutcome::Applied);
            assert_eq!(c.complete_parse(&ticket_a, result_a), ParseOutcome::Stale);
        } else {
            assert_eq!(c.complete_parse(&ticket_a, result_a), ParseOutcome::Stale);
            assert_eq!(c.complete_parse(&ticket_b, result_b), ParseOutcome::Applied);
        }
        assert_eq!(global_keys(c.visual_model()), vec!["C"]);
        assert_eq!(c.source(), "map(\"C\", \"D\");");
    }
}

#[test]
fn test_result_for_text_edited_after_issue_is_stale() {
    let mut c = open("", vec![]);
    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"B\");", t0);
    let ticket = c.poll(t0 + ms(500)).unwrap();
    c.edit_text("map(\"A\", \"B\"", t0 + ms(510));
    let result = DslParser.parse(&ticket.source, CheckOptions::default());
    assert_eq!(c.complete_parse(&ticket, result), ParseOutcome::Stale);
    assert!(global_keys(c.visual_model()).is_empty());
    assert_eq!(c.state(), SyncState::EditingText);
}

#[test]
fn test_duplicate_completion_is_stale() {
    let mut c = open("", vec![]);
    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"B\");", t0);
    let ticket = c.poll(t0 + ms(500)).unwrap();
    let result = DslParser.parse(&ticket.source, CheckOptions::default());
    assert_eq!(c.complete_parse(&ticket, result.clone()), ParseOutcome::Applied);
    assert_eq!(c.complete_parse(&ticket, result), ParseOutcome::Stale);
}

// ==================== Error containment ====================

#[test]
fn test_invalid_text_keeps_previous_model() {
    let mut c = open("map(\"A\", \"B\");\n", vec![]);
    let before = c.visual_model().clone();
    c.edit_text("map(\"A\", \"B\");\nmap(\"C\" \"D\");\n", Instant::now());
    assert_eq!(c.flush(), Some(ParseOutcome::Failed));

    assert_eq!(c.state(), SyncState::Error);
    assert_eq!(c.visual_model(), &before);
    let d = c.diagnostics();
    assert_eq!(d.len(), 1);
    let e = &d.items()[0];
    assert_eq!((e.line, e.column), (2, 9));
    assert!(c.has_blocking_errors());
    assert!(!c.can_save());
}

#[test]
fn test_error_state_clears_on_next_good_parse() {
    let mut c = open("", vec![]);
    c.edit_text("map(\"A\"", Instant::now());
    settle(&mut c);
    assert_eq!(c.state(), SyncState::Error);
    c.edit_text("map(\"A\", \"B\");", Instant::now());
    settle(&mut c);
    assert_eq!(c.state(), SyncState::Clean);
    assert!(c.diagnostics().is_empty());
}

#[test]
fn test_validation_error_blocks_like_a_syntax_error() {
    let mut c = open("map(\"A\", \"B\");\n", vec![]);
    c.edit_text("map(\"A\", \"B\");\nmap(\"A\", \"C\");\n", Instant::now());
    assert_eq!(c.flush(), Some(ParseOutcome::Failed));
    assert_eq!(c.ast().global_mappings.len(), 1);
    assert_eq!(c.next_error(0, 0).map(|d| d.line), Some(2));
}

#[test]
fn test_unterminated_first_edit_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsProfileStore::new(dir.path());
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "fresh", &StaticDeviceRegistry::default()).unwrap();
    assert_eq!(c.source(), DEFAULT_TEMPLATE);

    c.edit_text("map(\"A\",\"B\"", Instant::now());
    let err = c.save(&store, Instant::now()).unwrap_err();
    assert!(matches!(err, SyncError::SaveBlocked(1)));
    assert_eq!(c.diagnostics().len(), 1);
    assert_eq!(c.visual_model(), &VisualModel::default());
    assert!(!dir.path().join("fresh.rhai").exists());
}

// ==================== Devices ====================

#[test]
fn test_disconnected_device_is_surfaced_not_dropped() {
    let c = open("device(\"SN-999\") {\n    map(\"A\", \"B\");\n}\n", vec![serial("SN-001")]);
    let scope = c.visual_model().scope(&Scope::device("SN-999")).expect("scope kept");
    assert!(scope.is_disconnected());
    assert_eq!(scope.base().keys.len(), 1);
    assert!(c.diagnostics().is_empty());
    assert_eq!(c.state(), SyncState::Clean);
}

#[test]
fn test_device_connected_versus_empty_registry() {
    let src = "device(\"SN-001\") { map(\"A\",\"B\"); }";
    let mut c = open(src, vec![serial("SN-001")]);
    let scope = c.visual_model().scope(&Scope::device("SN-001")).unwrap();
    assert!(!scope.is_disconnected());
    assert_eq!(scope.device.as_ref().unwrap().device_id.as_deref(), Some("dev-SN-001"));
    assert_eq!(scope.base().keys.get("A"), Some(&Mapping::simple("A", "B")));

    c.set_devices(vec![]);
    let scope = c.visual_model().scope(&Scope::device("SN-001")).unwrap();
    assert!(scope.is_disconnected());
    assert_eq!(scope.base().keys.get("A"), Some(&Mapping::simple("A", "B")));
}

// ==================== Visual edits ====================

#[test]
fn test_visual_edit_appends_mapping_in_order() {
    let mut c = open("map(\"A\",\"B\");", vec![]);
    assert_eq!(c.ast().global_mappings.len(), 1);
    c.apply_visual_edit(VisualEdit::SetMapping {
        scope: Scope::Global,
        layer: BASE_LAYER.to_string(),
        mapping: Mapping::simple("C", "D"),
    })
    .unwrap();

    let reparsed = parse(c.source()).unwrap();
    let pairs: Vec<(String, Action)> = reparsed
        .global_mappings
        .iter()
        .map(|m| (m.source_key.clone(), m.action.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("A".to_string(), Action::Simple { target_key: "B".into() }),
            ("C".to_string(), Action::Simple { target_key: "D".into() }),
        ]
    );
    assert_eq!(&reparsed, c.ast());
    assert_eq!(c.state(), SyncState::Clean);
    assert!(c.is_dirty());
}

#[test]
fn test_visual_edit_keeps_comments() {
    let src = "// Work laptop\nmap(\"CapsLock\", \"Escape\"); // muscle memory\n\ndevice(\"SN-001\") {\n    // home row\n    tap_hold(\"Space\", \"Space\", \"MD_00\", 200);\n}\n";
    let mut c = open(src, vec![]);
    c.apply_visual_edit(VisualEdit::SetMapping {
        scope: Scope::device("SN-001"),
        layer: BASE_LAYER.to_string(),
        mapping: Mapping::simple("A", "B"),
    })
    .unwrap();
    assert_eq!(
        c.source(),
        "// Work laptop\nmap(\"CapsLock\", \"Escape\"); // muscle memory\n\ndevice(\"SN-001\") {\n    // home row\n    tap_hold(\"Space\", \"Space\", \"MD_00\", 200);\n    map(\"A\", \"B\");\n}\n"
    );
}

#[test]
fn test_visual_edit_refused_while_source_invalid() {
    let mut c = open("map(\"A\", \"B\");", vec![]);
    c.edit_text("map(\"A\"", Instant::now());
    settle(&mut c);
    let err = c
        .apply_visual_edit(VisualEdit::AddDevice {
            pattern: "SN-1".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, SyncError::SourceInvalid(1)));
    assert_eq!(c.source(), "map(\"A\"");
}

#[test]
fn test_rejected_edit_leaves_state_untouched() {
    let mut c = open("map(\"A\", \"B\");\n", vec![]);
    let source = c.source().to_string();
    let err = c
        .apply_visual_edit(VisualEdit::RemoveMapping {
            scope: Scope::Global,
            layer: BASE_LAYER.to_string(),
            key: "Z".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, SyncError::Edit(_)));
    assert_eq!(c.source(), source);
    assert_eq!(c.state(), SyncState::Clean);
}

#[test]
fn test_added_device_binds_to_known_device() {
    let mut c = open("", vec![serial("SN-7")]);
    c.apply_visual_edit(VisualEdit::AddDevice {
        pattern: "SN-7".to_string(),
    })
    .unwrap();
    let scope = c.visual_model().scope(&Scope::device("SN-7")).unwrap();
    assert!(!scope.is_disconnected());
    assert!(!c.source().contains("device"));

    c.apply_visual_edit(VisualEdit::SetMapping {
        scope: Scope::device("SN-7"),
        layer: BASE_LAYER.to_string(),
        mapping: Mapping::simple("A", "B"),
    })
    .unwrap();
    assert!(c.source().contains("device(\"SN-7\") {"));
}

#[test]
fn test_selection_survives_reparse() {
    let mut c = open("map(\"A\", \"B\");\ndevice(\"SN-1\") {\n    layer(\"nav\") { map(\"H\", \"Left\"); }\n}\n", vec![]);
    let dev = Scope::device("SN-1");
    c.select_scope(&dev).unwrap();
    c.select_layer(&dev, "nav").unwrap();
    let source = c.source().to_string();

    c.edit_text(format!("{}map(\"C\", \"D\");\n", source), Instant::now());
    settle(&mut c);
    assert_eq!(c.visual_model().active_scope, dev);
    assert_eq!(c.visual_model().scope(&dev).unwrap().active_layer, "nav");
    assert!(c.select_layer(&dev, "missing").is_err());
}

// ==================== Save ====================

#[test]
fn test_save_flushes_pending_text_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsProfileStore::new(dir.path());
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "work", &StaticDeviceRegistry::default()).unwrap();

    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"B\");\n", t0);
    c.save(&store, t0 + ms(10)).unwrap();
    assert!(c.deadline().is_none());
    assert_eq!(global_keys(c.visual_model()), vec!["A"]);
    assert!(!c.is_dirty());
    assert_eq!(c.last_saved(), Some(t0 + ms(10)));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("work.rhai")).unwrap(),
        "map(\"A\", \"B\");\n"
    );

    c.edit_text("map(\"A\", \"C\");\n", t0 + ms(20));
    c.save(&store, t0 + ms(30)).unwrap();
    assert_eq!(store.load_config("work").unwrap().hash, c.hash());
}

#[test]
fn test_configured_store_opens_template_and_saves_with_extension() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::from_toml(
        "debounce_ms = 100\nprofile_extension = \"keymap\"\ndefault_template = \"// fresh profile\\n\"\n",
    )
    .unwrap();
    let store = FsProfileStore::from_config(dir.path(), &config);
    let mut c = SyncController::new(config);
    c.open(&store, "desk", &StaticDeviceRegistry::default()).unwrap();
    assert_eq!(c.source(), "// fresh profile\n");
    assert_eq!(c.state(), SyncState::Clean);

    let t0 = Instant::now();
    c.edit_text("// fresh profile\nmap(\"A\", \"B\");\n", t0);
    assert_eq!(c.deadline(), Some(t0 + ms(100)));
    c.save(&store, t0 + ms(10)).unwrap();
    assert!(dir.path().join("desk.keymap").exists());
    assert!(!dir.path().join("desk.rhai").exists());
}

#[test]
fn test_save_conflict_when_file_changed_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsProfileStore::new(dir.path());
    std::fs::write(dir.path().join("work.rhai"), "map(\"A\", \"B\");\n").unwrap();
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "work", &StaticDeviceRegistry::default()).unwrap();

    std::fs::write(dir.path().join("work.rhai"), "map(\"X\", \"Y\");\n").unwrap();
    c.edit_text("map(\"A\", \"C\");\n", Instant::now());
    let err = c.save(&store, Instant::now()).unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Conflict { .. })));
    assert_eq!(c.source(), "map(\"A\", \"C\");\n");
}

#[test]
fn test_persistence_failure_keeps_memory_state() {
    let store = FailingStore(MemoryProfileStore::new().with_profile("p", "map(\"A\", \"B\");\n"));
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "p", &StaticDeviceRegistry::default()).unwrap();
    c.apply_visual_edit(VisualEdit::SetMapping {
        scope: Scope::Global,
        layer: BASE_LAYER.to_string(),
        mapping: Mapping::simple("C", "D"),
    })
    .unwrap();
    let source = c.source().to_string();
    let model = c.visual_model().clone();
    let hash = c.hash().to_string();

    let err = c.save(&store, Instant::now()).unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Io(_))));
    assert_eq!(c.source(), source);
    assert_eq!(c.visual_model(), &model);
    assert_eq!(c.hash(), hash);
    assert!(c.is_dirty());
    assert!(c.can_save());
}

#[test]
fn test_save_without_profile() {
    let mut c = SyncController::new(EngineConfig::default());
    let err = c.save(&MemoryProfileStore::new(), Instant::now()).unwrap_err();
    assert!(matches!(err, SyncError::NoProfile));
}

// ==================== Profile switch ====================

#[test]
fn test_profile_switch_cancels_pending_work() {
    let store = MemoryProfileStore::new()
        .with_profile("work", "map(\"A\", \"B\");\n")
        .with_profile("game", "map(\"W\", \"Up\");\n");
    let mut c = SyncController::new(EngineConfig::default());
    c.open(&store, "work", &StaticDeviceRegistry::default()).unwrap();

    let t0 = Instant::now();
    c.edit_text("map(\"A\", \"C\");\n", t0);
    let in_flight = c.poll(t0 + ms(500)).unwrap();
    c.edit_text("map(\"A\", \"D\");\n", t0 + ms(600));

    c.open(&store, "game", &StaticDeviceRegistry::default()).unwrap();
    assert_eq!(c.state(), SyncState::Clean);
    assert!(c.deadline().is_none());
    assert!(c.poll(t0 + ms(5000)).is_none());

    let late = DslParser.parse(&in_flight.source, CheckOptions::default());
    assert_eq!(c.complete_parse(&in_flight, late), ParseOutcome::Stale);
    assert_eq!(c.profile(), Some("game"));
    assert_eq!(global_keys(c.visual_model()), vec!["W"]);
    assert_eq!(c.source(), "map(\"W\", \"Up\");\n");
}

#[test]
fn test_invalid_profile_on_disk_opens_in_error_state() {
    let c = open("device(\"SN-1\") {\n", vec![]);
    assert_eq!(c.state(), SyncState::Error);
    assert_eq!(c.visual_model(), &VisualModel::default());
    assert!(!c.can_save());
}
