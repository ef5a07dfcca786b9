//! End-to-end transfer scenarios: scalars, frozen clones, function
//! marshalling, and the misuse guard, driven through a full manager pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_harness::BridgePair;
use tether_runtime::{AdaptHint, BridgeError, Shareable, Value, ValueKind};

#[test]
fn scalars_cross_in_both_directions() {
    let pair = BridgePair::new();
    for value in [
        Value::Undefined,
        Value::Null,
        Value::Bool(false),
        Value::from(-0.5),
        Value::string("tether"),
    ] {
        let boxed = {
            let mut rt = pair.host.runtime();
            Shareable::adapt(&pair.host, &mut rt, &value, AdaptHint::Auto).unwrap()
        };
        let mut ui_rt = pair.ui.runtime();
        assert_eq!(boxed.get_value(&pair.ui, &mut ui_rt).unwrap(), value);
        drop(ui_rt);

        let back = {
            let mut rt = pair.ui.runtime();
            Shareable::adapt(&pair.ui, &mut rt, &value, AdaptHint::Auto).unwrap()
        };
        let mut host_rt = pair.host.runtime();
        assert_eq!(back.get_value(&pair.host, &mut host_rt).unwrap(), value);
    }
}

#[test]
fn config_object_freezes_at_home_and_clones_in_order() {
    let pair = BridgePair::new();
    let (boxed, source) = {
        let mut rt = pair.host.runtime();
        let style = rt.create_object(vec![("opacity".to_string(), Value::from(0.5))]);
        let config = rt.create_object(vec![
            ("width".to_string(), Value::from(120.0)),
            ("height".to_string(), Value::from(80.0)),
            ("style".to_string(), Value::Object(style)),
        ]);
        let boxed =
            Shareable::adapt(&pair.host, &mut rt, &Value::Object(config), AdaptHint::Auto).unwrap();
        assert!(rt.is_frozen(config));
        (boxed, config)
    };
    assert_eq!(boxed.kind(), ValueKind::FrozenObject);

    let mut ui_rt = pair.ui.runtime();
    let clone = boxed.get_value(&pair.ui, &mut ui_rt).unwrap();
    let id = clone.object_id().unwrap();
    let names: Vec<String> = ui_rt
        .props(id)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, ["width", "height", "style"]);

    // The clone is frozen: writes vanish, reads stay stable.
    ui_rt.set_property(id, "width", Value::from(999.0)).unwrap();
    assert_eq!(ui_rt.get_property(id, "width").unwrap(), Value::from(120.0));

    // The nested object crossed as a frozen clone of its own.
    let style = ui_rt.get_property(id, "style").unwrap();
    let style_id = style.object_id().unwrap();
    assert!(ui_rt.is_frozen(style_id));
    assert_eq!(
        ui_rt.get_property(style_id, "opacity").unwrap(),
        Value::from(0.5)
    );
    drop(ui_rt);

    // Unboxing on the home side hands back the original object.
    let mut host_rt = pair.host.runtime();
    assert_eq!(
        boxed.get_value(&pair.host, &mut host_rt).unwrap(),
        Value::Object(source)
    );
}

#[test]
fn repeated_transfer_reuses_one_box_and_one_clone() {
    let pair = BridgePair::new();
    let mut host_rt = pair.host.runtime();
    let obj = host_rt.create_object(vec![("n".to_string(), Value::from(1.0))]);
    let first =
        Shareable::adapt(&pair.host, &mut host_rt, &Value::Object(obj), AdaptHint::Auto).unwrap();
    let second =
        Shareable::adapt(&pair.host, &mut host_rt, &Value::Object(obj), AdaptHint::Auto).unwrap();
    assert!(first.ptr_eq(&second));
    drop(host_rt);

    let mut ui_rt = pair.ui.runtime();
    let a = first.get_value(&pair.ui, &mut ui_rt).unwrap();
    let b = second.get_value(&pair.ui, &mut ui_rt).unwrap();
    assert_eq!(a, b);

    // The UI clone is also registered, so adapting it lands on the same box.
    let readapted = Shareable::adapt(&pair.ui, &mut ui_rt, &a, AdaptHint::Auto).unwrap();
    assert!(readapted.ptr_eq(&first));
}

#[test]
fn host_function_called_from_ui_runs_on_host_later() {
    let pair = BridgePair::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let boxed = {
        let mut rt = pair.host.runtime();
        let sink = Arc::clone(&calls);
        let func = rt.create_function(
            "onProgress",
            Arc::new(move |_rt, args: &[Value]| {
                sink.lock().expect("sink poisoned").extend(args.iter().cloned());
                Ok(Value::Undefined)
            }),
        );
        Shareable::adapt(&pair.host, &mut rt, &Value::Object(func), AdaptHint::Auto).unwrap()
    };
    assert_eq!(boxed.kind(), ValueKind::HostFunction);

    {
        let mut ui_rt = pair.ui.runtime();
        let stub = boxed.get_value(&pair.ui, &mut ui_rt).unwrap();
        // Fire-and-forget: the result is always undefined and nothing ran yet.
        let out = ui_rt
            .call_value(&stub, &[Value::from(0.25), Value::string("running")])
            .unwrap();
        assert_eq!(out, Value::Undefined);
    }
    assert!(calls.lock().expect("sink poisoned").is_empty());
    assert_eq!(pair.scheduler.pending_host(), 1);

    pair.scheduler.run_host();
    assert_eq!(
        *calls.lock().expect("sink poisoned"),
        vec![Value::from(0.25), Value::string("running")]
    );
}

#[test]
fn nested_host_function_becomes_a_misuse_guard() {
    let pair = BridgePair::new();
    let boxed = {
        let mut rt = pair.host.runtime();
        let func = rt.create_function("onEnd", Arc::new(|_, _| Ok(Value::Undefined)));
        let config = rt.create_object(vec![
            ("duration".to_string(), Value::from(300.0)),
            ("onEnd".to_string(), Value::Object(func)),
        ]);
        let boxed =
            Shareable::adapt(&pair.host, &mut rt, &Value::Object(config), AdaptHint::Auto).unwrap();
        // Objects carrying host functions never freeze at home.
        assert!(!rt.is_frozen(config));
        boxed
    };
    assert!(boxed.references_host_function());

    let mut ui_rt = pair.ui.runtime();
    let clone = boxed.get_value(&pair.ui, &mut ui_rt).unwrap();
    let id = clone.object_id().unwrap();
    assert_eq!(
        ui_rt.get_property(id, "duration").unwrap(),
        Value::from(300.0)
    );

    let guard = ui_rt.get_property(id, "onEnd").unwrap();
    assert_eq!(ui_rt.call_value(&guard, &[]).unwrap(), Value::Undefined);
    assert_eq!(pair.handler.raised(), 1);
    let messages = pair.handler.messages();
    assert!(messages[0].contains("onEnd"));
    assert!(messages[0].contains("worklet"));
}

#[test]
fn worklet_called_from_host_dispatches_to_ui() {
    let pair = BridgePair::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    pair.compiler.register(
        "(x) => apply(x)",
        Arc::new(move |_rt, args: &[Value]| {
            assert_eq!(args, [Value::from(9.0)]);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        }),
    );

    let boxed = {
        let mut rt = pair.host.runtime();
        let env = rt.create_object(vec![]);
        let info = tether_core::WorkletInfo::new("(x) => apply(x)", "gesture.js:12", env);
        let worklet = rt.create_worklet("apply", info);
        Shareable::adapt(&pair.host, &mut rt, &Value::Object(worklet), AdaptHint::Auto).unwrap()
    };
    assert_eq!(boxed.kind(), ValueKind::Worklet);

    {
        let mut host_rt = pair.host.runtime();
        let stub = boxed.get_value(&pair.host, &mut host_rt).unwrap();
        let out = host_rt.call_value(&stub, &[Value::from(9.0)]).unwrap();
        assert_eq!(out, Value::Undefined);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(pair.scheduler.pending_ui(), 1);

    pair.scheduler.run_ui();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(pair.handler.raised(), 0);
}

#[test]
fn failing_worklet_dispatch_reports_on_the_ui_handler() {
    let pair = BridgePair::new();
    pair.compiler.register(
        "() => boom()",
        Arc::new(|_rt, _args| Err(BridgeError::conversion("boom"))),
    );

    let boxed = {
        let mut rt = pair.host.runtime();
        let env = rt.create_object(vec![]);
        let info = tether_core::WorkletInfo::new("() => boom()", "fail.js:1", env);
        let worklet = rt.create_worklet("boom", info);
        Shareable::adapt(&pair.host, &mut rt, &Value::Object(worklet), AdaptHint::Auto).unwrap()
    };

    {
        let mut host_rt = pair.host.runtime();
        let stub = boxed.get_value(&pair.host, &mut host_rt).unwrap();
        host_rt.call_value(&stub, &[]).unwrap();
    }
    pair.scheduler.run_ui();
    // Exactly one report crosses the handler for one failed dispatch.
    assert_eq!(pair.handler.raised(), 1);
    assert!(pair.handler.messages()[0].contains("fail.js:1"));
    // The ambient this-context unwound even though the invocation failed.
    let ui_rt = pair.ui.runtime();
    assert_eq!(ui_rt.this(), Value::Undefined);
    assert_eq!(ui_rt.current_worklet_location(), None);
}

#[test]
fn foreign_host_objects_are_not_transferable() {
    use std::any::Any;
    use tether_core::{HostObject, Result, Runtime};

    struct Opaque;
    impl HostObject for Opaque {
        fn get(&self, _rt: &mut Runtime, _name: &str) -> Result<Value> {
            Ok(Value::Undefined)
        }
        fn set(&self, _rt: &mut Runtime, _name: &str, _value: Value) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let pair = BridgePair::new();
    let mut rt = pair.host.runtime();
    let id = rt.create_host_object(Arc::new(Opaque));
    let err = Shareable::adapt(&pair.host, &mut rt, &Value::Object(id), AdaptHint::Auto)
        .unwrap_err();
    assert!(matches!(err, BridgeError::Conversion { .. }));
}
