use serde_json::{json, Value};
use tether_core::db::open_db_in_memory;
use tether_core::{
    CoreConfig, EntityId, EntityStore, Fields, LinkError, LinkErrorKind, LinkService, Record,
    Relation, ResourceKind, SqliteEntityStore,
};

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        other => panic!("expected object, got {other}"),
    }
}

fn put(store: &SqliteEntityStore<'_>, kind: ResourceKind, value: Value) -> Record {
    store.put(kind, None, &fields(value)).unwrap()
}

fn reload(store: &SqliteEntityStore<'_>, record: &Record) -> Record {
    store.get(record.kind, &record.id).unwrap().unwrap()
}

fn new_ship(store: &SqliteEntityStore<'_>, name: &str) -> Record {
    put(
        store,
        ResourceKind::Ship,
        json!({"name": name, "type": "Catamaran", "length": 28, "cargo": []}),
    )
}

fn new_cargo(store: &SqliteEntityStore<'_>) -> Record {
    put(
        store,
        ResourceKind::Cargo,
        json!({
            "weight": 100,
            "content": "LEGO Blocks",
            "delivery_date": "1/1/2020",
            "carrier": null
        }),
    )
}

fn new_slip(store: &SqliteEntityStore<'_>, number: i64) -> Record {
    put(
        store,
        ResourceKind::Slip,
        json!({"number": number, "current_boat": null, "arrival_date": null}),
    )
}

#[test]
fn attach_cargo_links_both_sides() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let ship = new_ship(&store, "Sea Witch");
    let cargo = new_cargo(&store);

    let linked = links
        .attach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap();

    let stored_cargo = reload(&store, &cargo);
    let carrier = stored_cargo.field("carrier").unwrap();
    assert_eq!(carrier["id"], ship.id.to_value());
    assert_eq!(carrier["name"], json!("Sea Witch"));
    assert_eq!(
        carrier["self"],
        json!(format!("http://localhost:8080/ships/{}", ship.id))
    );

    let stored_ship = reload(&store, &ship);
    let listed = stored_ship.field("cargo").unwrap().as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], cargo.id.to_value());
    assert_eq!(
        listed[0]["self"],
        json!(format!("http://localhost:8080/cargo/{}", cargo.id))
    );

    assert_eq!(linked.owner, stored_ship);
    assert_eq!(linked.item, stored_cargo);
}

#[test]
fn attach_uses_configured_host_name_for_stubs() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let config = CoreConfig::from_json_str(r#"{"host_name": "https://marina.example/"}"#).unwrap();
    let links = LinkService::new(&store, &config);
    let ship = new_ship(&store, "Argo");
    let cargo = new_cargo(&store);

    links
        .attach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap();

    let carrier = reload(&store, &cargo).field("carrier").cloned().unwrap();
    assert_eq!(
        carrier["self"],
        json!(format!("https://marina.example/ships/{}", ship.id))
    );
}

#[test]
fn attach_already_linked_cargo_leaves_second_ship_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let first = new_ship(&store, "Argo");
    let second = new_ship(&store, "Nautilus");
    let cargo = new_cargo(&store);
    links
        .attach(Relation::ShipCargo, &first.id, &cargo.id)
        .unwrap();

    let err = links
        .attach(Relation::ShipCargo, &second.id, &cargo.id)
        .unwrap_err();

    assert_eq!(err.kind(), LinkErrorKind::AlreadyLinked);
    assert_eq!(err.status_code(), 403);
    assert_eq!(reload(&store, &second).field("cargo"), Some(&json!([])));
    assert_eq!(
        reload(&store, &cargo).field("carrier").unwrap()["id"],
        first.id.to_value()
    );
}

#[test]
fn attach_missing_record_returns_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let ship = new_ship(&store, "Argo");

    let err = links
        .attach(Relation::ShipCargo, &ship.id, &EntityId::from("999"))
        .unwrap_err();

    match &err {
        LinkError::NotFound { kind, id } => {
            assert_eq!(*kind, ResourceKind::Cargo);
            assert_eq!(id.as_str(), "999");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.status_code(), 404);
    assert_eq!(reload(&store, &ship).field("cargo"), Some(&json!([])));
}

#[test]
fn attach_replaces_stale_stub_for_same_item() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let cargo = new_cargo(&store);
    let ship = put(
        &store,
        ResourceKind::Ship,
        json!({"name": "Argo", "cargo": [{"id": cargo.id.as_str(), "self": "stale"}]}),
    );

    links
        .attach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap();

    let listed = reload(&store, &ship).field("cargo").cloned().unwrap();
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_ne!(listed[0]["self"], json!("stale"));
}

#[test]
fn detach_unlisted_cargo_returns_not_linked_and_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let ship = new_ship(&store, "Argo");
    let cargo = new_cargo(&store);

    let err = links
        .detach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap_err();

    assert!(matches!(err, LinkError::NotLinked { .. }));
    assert_eq!(err.status_code(), 404);
    assert_eq!(reload(&store, &ship), ship);
    assert_eq!(reload(&store, &cargo), cargo);
}

#[test]
fn detach_linked_cargo_clears_both_sides() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let ship = new_ship(&store, "Argo");
    let kept = new_cargo(&store);
    let removed = new_cargo(&store);
    links
        .attach(Relation::ShipCargo, &ship.id, &kept.id)
        .unwrap();
    links
        .attach(Relation::ShipCargo, &ship.id, &removed.id)
        .unwrap();

    let unlinked = links
        .detach(Relation::ShipCargo, &ship.id, &removed.id)
        .unwrap();

    let listed = reload(&store, &ship).field("cargo").cloned().unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], kept.id.to_value());
    assert_eq!(reload(&store, &removed).field("carrier"), Some(&Value::Null));
    assert_eq!(
        unlinked.item.unwrap().field("carrier"),
        Some(&Value::Null)
    );
}

#[test]
fn detach_of_stale_stub_keeps_link_to_current_owner() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let current = new_ship(&store, "Nautilus");
    let cargo = new_cargo(&store);
    links
        .attach(Relation::ShipCargo, &current.id, &cargo.id)
        .unwrap();
    let stale = put(
        &store,
        ResourceKind::Ship,
        json!({"name": "Argo", "cargo": [{"id": cargo.id.as_str()}]}),
    );
    let linked_cargo = reload(&store, &cargo);

    let unlinked = links
        .detach(Relation::ShipCargo, &stale.id, &cargo.id)
        .unwrap();

    assert_eq!(unlinked.owner.field("cargo"), Some(&json!([])));
    assert_eq!(reload(&store, &stale).field("cargo"), Some(&json!([])));
    assert_eq!(unlinked.item.as_ref(), Some(&linked_cargo));
    assert_eq!(reload(&store, &cargo), linked_cargo);
    assert_eq!(
        linked_cargo.field("carrier").unwrap()["id"],
        current.id.to_value()
    );
    let listed = reload(&store, &current).field("cargo").cloned().unwrap();
    assert_eq!(listed[0]["id"], cargo.id.to_value());
}

#[test]
fn detach_with_missing_item_still_updates_owner() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let ship = new_ship(&store, "Argo");
    let cargo = new_cargo(&store);
    links
        .attach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap();
    store.delete(ResourceKind::Cargo, &cargo.id).unwrap();

    let unlinked = links
        .detach(Relation::ShipCargo, &ship.id, &cargo.id)
        .unwrap();

    assert!(unlinked.item.is_none());
    assert_eq!(reload(&store, &ship).field("cargo"), Some(&json!([])));
}

#[test]
fn dock_fills_slot_and_rejects_second_ship_or_slip() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let slip = new_slip(&store, 5);
    let other_slip = new_slip(&store, 6);
    let ship = new_ship(&store, "Argo");
    let other_ship = new_ship(&store, "Nautilus");

    links.dock(&slip.id, &ship.id, "1/1/2020").unwrap();

    let stored = reload(&store, &slip);
    assert_eq!(stored.field("current_boat"), Some(&ship.id.to_value()));
    assert_eq!(stored.field("arrival_date"), Some(&json!("1/1/2020")));

    let err = links.dock(&slip.id, &other_ship.id, "2/1/2020").unwrap_err();
    assert_eq!(err.kind(), LinkErrorKind::AlreadyLinked);

    let err = links.dock(&other_slip.id, &ship.id, "2/1/2020").unwrap_err();
    assert_eq!(err.kind(), LinkErrorKind::AlreadyLinked);
    assert_eq!(reload(&store, &other_slip), other_slip);
}

#[test]
fn undock_clears_slot_and_arrival_date() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let slip = new_slip(&store, 5);
    let ship = new_ship(&store, "Argo");
    let stranger = new_ship(&store, "Nautilus");
    links.dock(&slip.id, &ship.id, "1/1/2020").unwrap();

    let err = links
        .detach(Relation::SlipShip, &slip.id, &stranger.id)
        .unwrap_err();
    assert!(matches!(err, LinkError::NotLinked { .. }));

    let unlinked = links
        .detach(Relation::SlipShip, &slip.id, &ship.id)
        .unwrap();
    assert_eq!(unlinked.owner.field("current_boat"), Some(&Value::Null));
    assert_eq!(unlinked.owner.field("arrival_date"), Some(&Value::Null));
    assert_eq!(unlinked.item, Some(ship));
    assert_eq!(reload(&store, &slip), unlinked.owner);
}

#[test]
fn attach_dog_to_user_stores_owner_id() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let user_id = EntityId::from("auth0|5d3b");
    store
        .put(
            ResourceKind::User,
            Some(&user_id),
            &fields(json!({"email": "owner@example.com", "dogs": []})),
        )
        .unwrap();
    let dog = put(
        &store,
        ResourceKind::Dog,
        json!({"name": "Rex", "breed": "Collie", "training": [], "owner_id": null}),
    );

    links.attach(Relation::UserDog, &user_id, &dog.id).unwrap();

    let stored_dog = reload(&store, &dog);
    assert_eq!(stored_dog.field("owner_id"), Some(&json!("auth0|5d3b")));
    let user = store.get(ResourceKind::User, &user_id).unwrap().unwrap();
    let dogs = user.field("dogs").unwrap().as_array().unwrap();
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0]["id"], dog.id.to_value());
    assert_eq!(dogs[0]["name"], json!("Rex"));
}

#[test]
fn attach_training_to_dog_links_stub_pair() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&conn).unwrap();
    let links = LinkService::new(&store, &CoreConfig::default());
    let dog = put(
        &store,
        ResourceKind::Dog,
        json!({"name": "Rex", "training": [], "owner_id": null}),
    );
    let training = put(
        &store,
        ResourceKind::Training,
        json!({"name": "Sit", "date": "3/3/2021", "dog": null}),
    );

    links
        .attach(Relation::DogTraining, &dog.id, &training.id)
        .unwrap();

    assert_eq!(
        reload(&store, &training).field("dog").unwrap()["id"],
        dog.id.to_value()
    );
    let listed = reload(&store, &dog).field("training").cloned().unwrap();
    assert_eq!(listed[0]["name"], json!("Sit"));

    links
        .detach(Relation::DogTraining, &dog.id, &training.id)
        .unwrap();
    assert_eq!(reload(&store, &training).field("dog"), Some(&Value::Null));
}
