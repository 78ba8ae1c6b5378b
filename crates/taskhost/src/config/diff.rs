//! Reconfiguration planning
//!
//! Compares two settings snapshots processor by processor (by name) and
//! decides what must happen to each pool.

use super::{BackgroundTaskHostSettings, TaskProcessorConfig};

/// What reconfiguration does to one processor
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorChange {
    /// Identical configuration and effective context; pool untouched
    Unchanged(String),
    /// Only the instance count differs; pool resized in place
    Resize {
        name: String,
        from: usize,
        to: usize,
    },
    /// Anything else differs; old pool drains, new pool starts
    Replace(TaskProcessorConfig),
    /// Processor no longer configured; pool drains and stops
    Remove(String),
    /// New processor; pool starts
    Add(TaskProcessorConfig),
}

/// Plan the transition from `current` to `next`
///
/// Removals come first, followed by every processor of `next` in
/// configuration order.
pub fn plan_changes(
    current: &BackgroundTaskHostSettings,
    next: &BackgroundTaskHostSettings,
) -> Vec<ProcessorChange> {
    let mut changes: Vec<ProcessorChange> = current
        .processors
        .iter()
        .filter(|old| next.processor(&old.name).is_none())
        .map(|old| ProcessorChange::Remove(old.name.clone()))
        .collect();

    for new in &next.processors {
        let change = match current.processor(&new.name) {
            None => ProcessorChange::Add(new.clone()),
            Some(old) => {
                let same_context =
                    current.effective_properties(old) == next.effective_properties(new);
                if !same_context || !old.same_except_instance_count(new) {
                    ProcessorChange::Replace(new.clone())
                } else if old.instance_count != new.instance_count {
                    ProcessorChange::Resize {
                        name: new.name.clone(),
                        from: old.instance_count,
                        to: new.instance_count,
                    }
                } else {
                    ProcessorChange::Unchanged(new.name.clone())
                }
            }
        };
        changes.push(change);
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropertyMap;
    use serde_json::json;

    fn settings(processors: Vec<TaskProcessorConfig>) -> BackgroundTaskHostSettings {
        BackgroundTaskHostSettings::new(PropertyMap::new(), processors)
    }

    fn processor(name: &str) -> TaskProcessorConfig {
        TaskProcessorConfig::new(name, "Task").with_request_queue("requests")
    }

    #[test]
    fn test_identical_settings_are_unchanged() {
        let current = settings(vec![processor("a"), processor("b")]);
        let changes = plan_changes(&current, &current.clone());
        assert_eq!(
            changes,
            vec![
                ProcessorChange::Unchanged("a".into()),
                ProcessorChange::Unchanged("b".into()),
            ]
        );
    }

    #[test]
    fn test_instance_count_change_resizes() {
        let current = settings(vec![processor("a")]);
        let next = current.with_instance_count("a", 3);
        assert_eq!(
            plan_changes(&current, &next),
            vec![ProcessorChange::Resize {
                name: "a".into(),
                from: 1,
                to: 3,
            }]
        );
    }

    #[test]
    fn test_added_and_removed() {
        let current = settings(vec![processor("a"), processor("b")]);
        let next = settings(vec![processor("b"), processor("c")]);
        assert_eq!(
            plan_changes(&current, &next),
            vec![
                ProcessorChange::Remove("a".into()),
                ProcessorChange::Unchanged("b".into()),
                ProcessorChange::Add(processor("c")),
            ]
        );
    }

    #[test]
    fn test_other_changes_replace() {
        let current = settings(vec![processor("a")]);
        let changed = processor("a").with_property("BatchSize", 5).with_instance_count(2);
        let next = settings(vec![changed.clone()]);
        assert_eq!(
            plan_changes(&current, &next),
            vec![ProcessorChange::Replace(changed)]
        );
    }

    #[test]
    fn test_inherited_context_change_replaces() {
        let current = settings(vec![processor("a"), processor("b").with_property("Mode", "x")]);
        let mut next = current.clone();
        next.default_context.insert("Mode".into(), json!("y"));

        // "b" overrides Mode, so its effective context is unchanged
        assert_eq!(
            plan_changes(&current, &next),
            vec![
                ProcessorChange::Replace(processor("a")),
                ProcessorChange::Unchanged("b".into()),
            ]
        );
    }
}
