use chrono::NaiveDate;
use serde_json::json;

use etc_core::{ErrorKind, EtcRecord, TollFields, ALLOWED_TRANSITIONS};
use etc_storage::{MemoryMappingGateway, MemoryRecordGateway};

use super::*;

struct Fixture {
    service: MappingService,
    mappings: Arc<MemoryMappingGateway>,
    record: EtcRecord,
}

async fn fixture() -> Fixture {
    let records = Arc::new(MemoryRecordGateway::new());
    let mappings = Arc::new(MemoryMappingGateway::new());
    let record = EtcRecord::new(TollFields {
        date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        time: "07:15:00".to_string(),
        entrance_ic: "川口JCT".to_string(),
        exit_ic: "浦和IC".to_string(),
        toll_amount: 510,
        car_number: "練馬 500 ほ 11-22".to_string(),
        etc_card_number: "5555666677778888".to_string(),
        device_id: None,
    });
    records.create(&record).await.unwrap();
    Fixture {
        service: MappingService::new(records, mappings.clone()),
        mappings,
        record,
    }
}

fn params(record_id: RecordId, status: Option<MappingStatus>) -> CreateMapping {
    CreateMapping {
        status,
        created_by: "ops".to_string(),
        ..CreateMapping::new(record_id, "vehicle-7", "vehicle")
    }
}

#[tokio::test]
async fn create_applies_defaults() {
    let f = fixture().await;
    let mapping = f
        .service
        .create_mapping(CreateMapping::new(f.record.id, "vehicle-7", "vehicle"))
        .await
        .unwrap();

    assert_eq!(mapping.confidence, 1.0);
    assert_eq!(mapping.status, MappingStatus::Active);
    assert_eq!(mapping.metadata, json!({}));
    assert_eq!(f.service.get_mapping(mapping.id).await.unwrap(), mapping);
}

#[tokio::test]
async fn create_for_missing_record_is_not_found() {
    let f = fixture().await;
    let err = f
        .service
        .create_mapping(params(RecordId::new_v4(), None))
        .await
        .unwrap_err();
    assert!(matches!(err, EtcError::NotFound { entity: "record", .. }));
    assert!(f.mappings.list(&MappingFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_confidence_never_opens_a_transaction() {
    let f = fixture().await;
    f.mappings.faults().fail_begin(true);

    let mut p = params(f.record.id, None);
    p.confidence = Some(1.5);
    let err = f.service.create_mapping(p).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn second_active_mapping_conflicts_until_first_is_inactive() {
    let f = fixture().await;
    let first = f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let err = f
        .service
        .create_mapping(params(f.record.id, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    f.service
        .update_status(first.id, MappingStatus::Inactive)
        .await
        .unwrap();
    let second = f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let active = f.service.active_mapping_for(f.record.id).await.unwrap().unwrap();
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn any_new_mapping_conflicts_with_an_active_one() {
    let f = fixture().await;
    f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    for status in MappingStatus::ALL {
        let err = f
            .service
            .create_mapping(params(f.record.id, Some(status)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate, "creating {status}");
    }
    let all = f
        .service
        .list_mappings(&MappingFilter::for_record(f.record.id))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn pending_mapping_may_coexist_with_active() {
    let f = fixture().await;
    let pending = f
        .service
        .create_mapping(params(f.record.id, Some(MappingStatus::Pending)))
        .await
        .unwrap();
    f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let err = f
        .service
        .update_status(pending.id, MappingStatus::Active)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert_eq!(
        f.service.get_mapping(pending.id).await.unwrap().status,
        MappingStatus::Pending
    );
}

#[tokio::test]
async fn rejecting_an_inactive_mapping_fails_and_leaves_it_inactive() {
    let f = fixture().await;
    let mapping = f.service.create_mapping(params(f.record.id, None)).await.unwrap();
    f.service
        .update_status(mapping.id, MappingStatus::Inactive)
        .await
        .unwrap();

    let err = f
        .service
        .update_status(mapping.id, MappingStatus::Rejected)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        f.service.get_mapping(mapping.id).await.unwrap().status,
        MappingStatus::Inactive
    );
}

#[tokio::test]
async fn every_status_pair_follows_the_table() {
    for from in MappingStatus::ALL {
        for to in MappingStatus::ALL {
            let f = fixture().await;
            let now = Utc::now();
            let mapping = Mapping {
                id: Uuid::new_v4(),
                record_id: f.record.id,
                entity_id: "vehicle-7".into(),
                entity_type: "vehicle".into(),
                mapping_type: "manual".into(),
                confidence: 0.9,
                status: from,
                metadata: json!({}),
                created_by: "ops".into(),
                created_at: now,
                updated_at: now,
            };
            f.mappings.create(&mapping).await.unwrap();

            let result = f.service.update_status(mapping.id, to).await;
            let allowed = ALLOWED_TRANSITIONS.contains(&(from, to));
            assert_eq!(result.is_ok(), allowed, "{from} -> {to}");

            let stored = f.service.get_mapping(mapping.id).await.unwrap().status;
            assert_eq!(stored, if allowed { to } else { from });
        }
    }
}

#[tokio::test]
async fn partial_update_touches_only_given_fields() {
    let f = fixture().await;
    let mapping = f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let updated = f
        .service
        .update_mapping(
            mapping.id,
            UpdateMapping {
                confidence: Some(0.4),
                metadata: Some(json!({"reviewed": true})),
                ..UpdateMapping::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.confidence, 0.4);
    assert_eq!(updated.metadata, json!({"reviewed": true}));
    assert_eq!(updated.entity_id, mapping.entity_id);
    assert_eq!(updated.status, MappingStatus::Active);
}

#[tokio::test]
async fn update_with_same_status_skips_transition_check() {
    let f = fixture().await;
    let mapping = f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let updated = f
        .service
        .update_mapping(
            mapping.id,
            UpdateMapping {
                status: Some(MappingStatus::Active),
                entity_id: Some("vehicle-8".into()),
                ..UpdateMapping::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.entity_id, "vehicle-8");
}

#[tokio::test]
async fn update_refuses_illegal_transition_atomically() {
    let f = fixture().await;
    let mapping = f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let err = f
        .service
        .update_mapping(
            mapping.id,
            UpdateMapping {
                status: Some(MappingStatus::Pending),
                entity_id: Some("vehicle-9".into()),
                ..UpdateMapping::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    let stored = f.service.get_mapping(mapping.id).await.unwrap();
    assert_eq!(stored.entity_id, "vehicle-7");
    assert_eq!(stored.status, MappingStatus::Active);
}

#[tokio::test]
async fn delete_is_hard() {
    let f = fixture().await;
    let mapping = f.service.create_mapping(params(f.record.id, None)).await.unwrap();
    f.service.delete_mapping(mapping.id).await.unwrap();

    assert_eq!(
        f.service.get_mapping(mapping.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        f.service.delete_mapping(mapping.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(f.service.active_mapping_for(f.record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_by_record() {
    let f = fixture().await;
    f.service
        .create_mapping(params(f.record.id, Some(MappingStatus::Pending)))
        .await
        .unwrap();
    f.service.create_mapping(params(f.record.id, None)).await.unwrap();

    let all = f
        .service
        .list_mappings(&MappingFilter::for_record(f.record.id))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    let other = f
        .service
        .list_mappings(&MappingFilter::for_record(RecordId::new_v4()))
        .await
        .unwrap();
    assert!(other.is_empty());
}
