//! Counter epic example: conditions, a chained epic, a listener, and undo.

use serde_json::{json, Value};
use tracing::info;

use ricochet_core::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_target(false)
        .compact()
        .init();

    let store = Store::new(
        StoreOptions::new()
            .with_debug(true)
            .with_undo(true)
            .with_max_undo_stack(5),
    );

    // A counter that increments on every INCREMENT action.
    store.register_epic(
        EpicDef::new("counter")
            .with_state(json!({"value": 0}))
            .with_updater(vec!["INCREMENT".into()], |_, ctx| {
                let value = ctx
                    .current_cycle_state
                    .as_ref()
                    .and_then(|s| s.get("value"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Ok(HandlerUpdate::state(json!({"value": value + 1})))
            }),
    )?;

    // A dependent epic that mirrors whether the counter is even.
    store.register_epic(
        EpicDef::new("parity").with_updater(
            vec![ConditionInput::Single(
                ConditionSpec::new("counter")
                    .with_selector(|state, _| Ok(json!(state["value"].as_i64().unwrap_or(0) % 2))),
            )],
            |values, _| {
                let even = values.get(0).and_then(Value::as_i64) == Some(0);
                Ok(HandlerUpdate::state(json!({"even": even})))
            },
        ),
    )?;

    let subscription = store.add_listener(vec![ConditionSpec::new("counter")], |values, ctx| {
        info!(
            counter = %values.get(0).cloned().unwrap_or(serde_json::Value::Null),
            source = %ctx.source_action.kind,
            "counter changed"
        );
        Ok(())
    })?;

    for _ in 0..3 {
        store.dispatch("INCREMENT")?;
    }

    let inspector = store.inspect().expect("debug store");
    info!(
        counter = %inspector.state("counter").unwrap_or(serde_json::Value::Null),
        parity = %inspector.state("parity").unwrap_or(serde_json::Value::Null),
        "after three increments"
    );

    store.undo()?;
    store.undo()?;
    store.redo()?;

    let inspector = store.inspect().expect("debug store");
    info!(
        counter = %inspector.state("counter").unwrap_or(serde_json::Value::Null),
        undo_depth = inspector.undo_depth(),
        redo_depth = inspector.redo_depth(),
        "after undo/undo/redo"
    );

    subscription.unsubscribe();
    Ok(())
}
