//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::reconcile_helpers::*;
    use crds::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use metal_store::{MockObjectStore, Store};
    use serde_json::json;
    use std::sync::Arc;

    fn settings(name: &str) -> BIOSSettings {
        BIOSSettings::new(
            name,
            BIOSSettingsSpec {
                version: "1.0".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_merge_diff_equal_values() {
        let value = json!({"state": "Applied", "conditions": [{"type": "a"}]});
        assert_eq!(merge_diff(&value, &value), None);
    }

    #[test]
    fn test_merge_diff_nulls_removed_keys() {
        let current = json!({"state": "Failed", "autoRetryCountRemaining": 1, "upgradeTask": {"URI": "/t/1", "percentComplete": 50}});
        let desired = json!({"state": "Pending", "upgradeTask": {"URI": "/t/1"}});
        let patch = merge_diff(&current, &desired).unwrap();
        assert_eq!(
            patch,
            json!({
                "state": "Pending",
                "autoRetryCountRemaining": null,
                "upgradeTask": {"percentComplete": null}
            })
        );
    }

    #[test]
    fn test_merge_diff_replaces_arrays_whole() {
        let current = json!({"conditions": [{"type": "a"}]});
        let desired = json!({"conditions": [{"type": "a"}, {"type": "b"}]});
        assert_eq!(merge_diff(&current, &desired), Some(desired.clone()));
    }

    #[test]
    fn test_is_controlled_by() {
        let mut owner = settings("owner");
        owner.metadata.uid = Some("uid-1".to_string());
        let reference = controller_reference(&owner).unwrap();
        assert_eq!(reference.kind, "BIOSSettings");
        assert_eq!(reference.controller, Some(true));

        let child = ObjectMeta {
            owner_references: Some(vec![reference]),
            ..Default::default()
        };
        assert!(is_controlled_by(&child, &owner));

        let mut stranger = settings("stranger");
        stranger.metadata.uid = Some("uid-2".to_string());
        assert!(!is_controlled_by(&child, &stranger));
    }

    #[test]
    fn test_controller_reference_needs_uid() {
        assert!(matches!(
            controller_reference(&settings("fresh")),
            Err(crate::error::ControllerError::MissingObjectKey(_))
        ));
    }

    #[tokio::test]
    async fn test_finalizer_round_trip() {
        let backend = Arc::new(MockObjectStore::new());
        let store: Store<BIOSSettings> = Store::all(backend.clone());
        let created = store.create(&settings("bs")).await.unwrap();

        assert!(ensure_finalizer(&store, &created, "metal.ironcore.dev/biossettings").await.unwrap());
        let current = store.get("bs").await.unwrap();
        assert!(has_finalizer(&current, "metal.ironcore.dev/biossettings"));
        assert!(!ensure_finalizer(&store, &current, "metal.ironcore.dev/biossettings").await.unwrap());

        remove_finalizer(&store, &current, "metal.ironcore.dev/biossettings").await.unwrap();
        let current = store.get("bs").await.unwrap();
        assert!(!has_finalizer(&current, "metal.ironcore.dev/biossettings"));
    }

    #[tokio::test]
    async fn test_patch_status_only_writes_changes() {
        let backend = Arc::new(MockObjectStore::new());
        let store: Store<BIOSSettings> = Store::all(backend.clone());
        store.create(&settings("bs")).await.unwrap();

        let status = BIOSSettingsStatus {
            state: Some(SettingsState::Pending),
            ..Default::default()
        };
        assert!(patch_status_if_changed(&store, "bs", None, &status).await.unwrap());
        let writes = backend.write_count();

        let stored = store.get("bs").await.unwrap();
        assert_eq!(stored.state(), Some(SettingsState::Pending));
        assert!(!patch_status_if_changed(&store, "bs", stored.status.as_ref(), &status).await.unwrap());
        assert_eq!(backend.write_count(), writes);

        let applied = BIOSSettingsStatus {
            state: Some(SettingsState::Applied),
            applied_setting_priority: i32::MAX,
            ..status.clone()
        };
        assert!(patch_status_if_changed(&store, "bs", stored.status.as_ref(), &applied).await.unwrap());
        let stored = store.get("bs").await.unwrap();
        assert_eq!(stored.status.unwrap().applied_setting_priority, i32::MAX);
    }
}
