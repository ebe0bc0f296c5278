//! Unit tests for the identity-event reconciler
//!
//! Tests cover:
//! - User create / update / delete against the in-memory store
//! - Deletion ordering (memberships before the user)
//! - Membership events with unresolved references
//! - Capture emitted exactly once, including on failure

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use eventdesk_shared::{
        IdentityStore, MemoryIdentityStore, Mutation, OrganizationProfile, UserProfile,
    };
    use serde_json::{json, Value};

    use super::super::events::WebhookEvent;
    use super::super::reconciler::{Outcome, Reconciler};
    use crate::analytics::recording::{Recorded, RecordingAnalytics};

    struct Harness {
        store: Arc<MemoryIdentityStore>,
        analytics: Arc<RecordingAnalytics>,
        reconciler: Reconciler,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryIdentityStore::new());
            let analytics = Arc::new(RecordingAnalytics::new());
            let reconciler = Reconciler::new(store.clone(), analytics.clone());
            Self {
                store,
                analytics,
                reconciler,
            }
        }

        async fn send(&self, event_type: &str, data: Value) -> Outcome {
            let body = json!({ "object": "event", "type": event_type, "data": data });
            let event = WebhookEvent::from_slice(body.to_string().as_bytes()).unwrap();
            self.reconciler.dispatch(&event).await
        }

        async fn seed_user(&self, clerk_id: &str) {
            self.store
                .create_user(clerk_id, &UserProfile::default())
                .await
                .unwrap();
        }

        async fn seed_organization(&self, clerk_id: &str) {
            self.store
                .upsert_organization(
                    clerk_id,
                    &OrganizationProfile {
                        name: "Acme".to_string(),
                        image_url: None,
                    },
                )
                .await
                .unwrap();
        }
    }

    fn user(id: &str, email: &str, first_name: &str) -> Value {
        json!({
            "id": id,
            "email_addresses": [{ "email_address": email }],
            "phone_numbers": [{ "phone_number": "+15555550100" }],
            "first_name": first_name,
            "last_name": "Lovelace",
            "image_url": "",
            "created_at": 1_700_000_000_000_i64
        })
    }

    fn membership(user_id: &str, org_id: &str) -> Value {
        json!({
            "id": "orgmem_1",
            "role": "org:member",
            "organization": { "id": org_id, "name": "Acme", "image_url": null },
            "public_user_data": { "user_id": user_id }
        })
    }

    fn capture(event: &str, distinct_id: &str) -> (String, String) {
        (event.to_string(), distinct_id.to_string())
    }

    #[tokio::test]
    async fn test_user_created_then_updated_keeps_one_row() {
        let h = Harness::new();

        let created = h.send("user.created", user("user_1", "ada@example.com", "Ada")).await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.body, "User created");

        let updated = h
            .send("user.updated", user("user_1", "countess@example.com", "Augusta"))
            .await;
        assert_eq!(updated.status, StatusCode::CREATED);
        assert_eq!(updated.body, "User updated");

        let users = h.store.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "countess@example.com");
        assert_eq!(users[0].first_name.as_deref(), Some("Augusta"));
        assert_eq!(users[0].image_url, None);
        assert_eq!(users[0].phone.as_deref(), Some("+15555550100"));

        assert_eq!(
            h.analytics.captures(),
            vec![capture("User Created", "user_1"), capture("User Updated", "user_1")]
        );
    }

    #[tokio::test]
    async fn test_user_created_identifies_person() {
        let h = Harness::new();
        h.send("user.created", user("user_1", "ada@example.com", "Ada")).await;

        let identify = h.analytics.records().into_iter().find_map(|r| match r {
            Recorded::Identify {
                distinct_id,
                properties,
            } => Some((distinct_id, properties)),
            _ => None,
        });
        let (distinct_id, properties) = identify.unwrap();
        assert_eq!(distinct_id, "user_1");
        assert_eq!(properties["email"], "ada@example.com");
        assert_eq!(properties["firstName"], "Ada");
        assert_eq!(properties["phoneNumber"], "+15555550100");
    }

    #[tokio::test]
    async fn test_duplicate_user_created_fails_but_still_captures() {
        let h = Harness::new();
        h.seed_user("user_1").await;

        let outcome = h.send("user.created", user("user_1", "ada@example.com", "Ada")).await;

        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.body, "User creation failed");
        assert_eq!(h.analytics.captures(), vec![capture("User Created", "user_1")]);
        assert!(!h
            .analytics
            .records()
            .iter()
            .any(|r| matches!(r, Recorded::Identify { .. })));
    }

    #[tokio::test]
    async fn test_store_outage_fails_every_handler_with_one_capture() {
        let h = Harness::new();
        h.store.set_writes_disabled(true);

        let cases = [
            (
                "user.created",
                user("user_1", "a@example.com", "A"),
                "User creation failed",
                "User Created",
            ),
            (
                "user.updated",
                user("user_1", "a@example.com", "A"),
                "User update failed",
                "User Updated",
            ),
            (
                "organization.created",
                json!({ "id": "org_1", "name": "Acme", "created_by": "user_1" }),
                "Organization create failed",
                "Organization Created",
            ),
            (
                "organization.updated",
                json!({ "id": "org_1", "name": "Acme", "created_by": "user_1" }),
                "Organization update failed",
                "Organization Updated",
            ),
        ];

        for (event_type, data, body, captured) in cases {
            let before = h.analytics.captures().len();
            let outcome = h.send(event_type, data).await;

            assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR, "{event_type}");
            assert_eq!(outcome.body, body);

            let captures = h.analytics.captures();
            assert_eq!(captures.len(), before + 1, "{event_type}");
            assert_eq!(captures[before], capture(captured, "user_1"));
        }
    }

    #[tokio::test]
    async fn test_user_deleted_removes_memberships_first() {
        let h = Harness::new();
        h.send("user.created", user("user_1", "ada@example.com", "Ada")).await;
        h.seed_organization("org_1").await;
        h.send("organizationMembership.created", membership("user_1", "org_1")).await;
        assert_eq!(h.store.members().len(), 1);

        let outcome = h.send("user.deleted", json!({ "id": "user_1", "deleted": true })).await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.body, "User deleted");
        assert!(h.store.users().is_empty());
        assert!(h.store.members().is_empty());

        let journal = h.store.journal();
        let memberships_at = journal
            .iter()
            .position(|m| matches!(m, Mutation::DeleteUserMemberships { rows: 1, .. }))
            .unwrap();
        let user_at = journal
            .iter()
            .position(|m| matches!(m, Mutation::DeleteUser { .. }))
            .unwrap();
        assert!(memberships_at < user_at);

        let last = h.analytics.captures().pop().unwrap();
        assert_eq!(last, capture("User Deleted", "user_1"));
    }

    #[tokio::test]
    async fn test_user_deleted_for_unknown_id_mutates_nothing() {
        let h = Harness::new();

        let outcome = h.send("user.deleted", json!({ "id": "user_ghost", "deleted": true })).await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert!(h.store.journal().is_empty());
        assert_eq!(h.analytics.captures(), vec![capture("User Deleted", "user_ghost")]);
    }

    #[tokio::test]
    async fn test_user_deleted_without_id_is_a_no_op() {
        let h = Harness::new();

        let outcome = h.send("user.deleted", json!({ "deleted": true })).await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.body, "User deleted");
        assert!(h.store.journal().is_empty());
        assert!(h.analytics.records().is_empty());
    }

    #[tokio::test]
    async fn test_membership_before_user_and_org_is_skipped() {
        let h = Harness::new();

        let outcome = h
            .send("organizationMembership.created", membership("user_1", "org_1"))
            .await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.body, "Organization membership created");
        assert!(h.store.journal().is_empty());
        assert!(h.store.organizations().is_empty());
        assert_eq!(
            h.analytics.captures(),
            vec![capture("Organization Member Created", "user_1")]
        );
    }

    #[tokio::test]
    async fn test_membership_created_then_deleted_leaves_no_rows() {
        let h = Harness::new();
        h.seed_user("user_1").await;
        h.seed_organization("org_1").await;

        let created = h
            .send("organizationMembership.created", membership("user_1", "org_1"))
            .await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(h.store.members().len(), 1);
        assert_eq!(h.store.members()[0].role.as_deref(), Some("org:member"));

        // Redelivery updates the same row
        h.send("organizationMembership.created", membership("user_1", "org_1"))
            .await;
        assert_eq!(h.store.members().len(), 1);

        let deleted = h
            .send("organizationMembership.deleted", membership("user_1", "org_1"))
            .await;
        assert_eq!(deleted.status, StatusCode::CREATED);
        assert_eq!(deleted.body, "Organization membership deleted");
        assert!(h.store.members().is_empty());

        assert_eq!(
            h.analytics.captures().last().cloned(),
            Some(capture("Organization Member Deleted", "user_1"))
        );
    }

    #[tokio::test]
    async fn test_membership_created_identifies_company_group() {
        let h = Harness::new();
        h.send("organizationMembership.created", membership("user_1", "org_1"))
            .await;

        let group = h.analytics.records().into_iter().find_map(|r| match r {
            Recorded::GroupIdentify(group) => Some(group),
            _ => None,
        });
        let group = group.unwrap();
        assert_eq!(group.group_type, "company");
        assert_eq!(group.group_key, "org_1");
        assert_eq!(group.distinct_id.as_deref(), Some("user_1"));
        assert!(group.properties.is_empty());
    }

    #[tokio::test]
    async fn test_organization_created_upserts() {
        let h = Harness::new();
        let data = json!({
            "id": "org_1",
            "name": "Acme",
            "image_url": "https://img.clerk.com/acme.png",
            "created_by": "user_1"
        });

        assert_eq!(h.send("organization.created", data.clone()).await.body, "Organization created");
        assert_eq!(h.send("organization.created", data).await.status, StatusCode::CREATED);

        let orgs = h.store.organizations();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].image_url.as_deref(), Some("https://img.clerk.com/acme.png"));
        assert_eq!(
            h.analytics.captures(),
            vec![
                capture("Organization Created", "user_1"),
                capture("Organization Created", "user_1")
            ]
        );
    }

    #[tokio::test]
    async fn test_organization_updated_without_creator_skips_capture() {
        let h = Harness::new();
        h.seed_organization("org_1").await;

        let outcome = h
            .send("organization.updated", json!({ "id": "org_1", "name": "Acme Inc" }))
            .await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.body, "Organization updated");
        assert_eq!(h.store.organizations()[0].name, "Acme Inc");
        assert!(h.analytics.captures().is_empty());
    }

    #[tokio::test]
    async fn test_identify_failure_surfaces_as_500_and_still_captures() {
        let h = Harness::new();
        h.analytics.fail_identify();

        let outcome = h.send("user.created", user("user_1", "ada@example.com", "Ada")).await;

        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.body, "User creation failed");
        assert_eq!(h.store.users().len(), 1);
        assert_eq!(h.analytics.captures(), vec![capture("User Created", "user_1")]);
    }

    #[tokio::test]
    async fn test_unknown_event_type_has_no_side_effects() {
        let h = Harness::new();

        let outcome = h.send("session.created", json!({ "id": "sess_1" })).await;

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.body, "");
        assert!(h.store.journal().is_empty());
        assert!(h.analytics.records().is_empty());
    }
}
