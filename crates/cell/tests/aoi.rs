use glam::Vec3;

use cellmesh::witness::{take_events, EntityKey, PacketLog, PropertyKey, MAX_ALIASES};
use cellmesh::{
    AoiEvent, CellConfig, CellError, Cluster, Direction3D, EntityDef, EntityDefs, EntityId,
    NullPersistence, PropertyFlags, PropertyValue, RecordingRuntime, RecordingSink,
};

const AVATAR: u16 = 1;
const SPACE: u32 = 1;
const NICK: u16 = 1;
const SECRET: u16 = 2;

fn setup(alias_entity_ids: bool) -> (Cluster, PacketLog, EntityId) {
    let defs = EntityDefs::new().with(
        EntityDef::new(AVATAR, "Avatar")
            .with_property(
                NICK,
                "nick",
                PropertyFlags::OTHER_CLIENTS,
                PropertyValue::Str("anon".into()),
            )
            .with_property(SECRET, "secret", PropertyFlags::CELL_PRIVATE, PropertyValue::Int(0))
            .with_all_hooks(),
    );
    let mut config = CellConfig::default();
    config.aoi.alias_entity_ids = alias_entity_ids;
    config.aoi.alias_property_ids = false;
    let mut cluster = Cluster::new(config, defs);
    let sink = RecordingSink::new();
    let log = sink.log();
    cluster
        .add_cell_with(
            1,
            Box::new(RecordingRuntime::new()),
            Box::new(sink),
            Box::new(NullPersistence),
        )
        .create_space(SPACE, "plane");
    let observer = spawn(&mut cluster, 0.0);
    let cell = cluster.cell_mut(1).unwrap();
    cell.attach_witness(observer).unwrap();
    cell.set_aoi_radius(observer, 5.0, 1.0).unwrap();
    (cluster, log, observer)
}

fn spawn(cluster: &mut Cluster, x: f32) -> EntityId {
    cluster
        .create_entity(1, AVATAR, SPACE, Vec3::new(x, 0.0, 0.0), Direction3D::default(), Vec::new())
        .unwrap()
}

fn place(cluster: &mut Cluster, id: EntityId, x: f32) {
    cluster
        .cell_mut(1)
        .unwrap()
        .set_position(id, Vec3::new(x, 0.0, 0.0))
        .unwrap();
}

fn members(cluster: &Cluster, observer: EntityId) -> Vec<EntityId> {
    cluster.cell(1).unwrap().entities_in_aoi(observer).unwrap()
}

/// Enter, leave and reset events only; updates are checked separately.
fn membership_events(log: &PacketLog, observer: EntityId) -> Vec<AoiEvent> {
    take_events(log, observer)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                AoiEvent::Enter { .. } | AoiEvent::Leave { .. } | AoiEvent::Reset
            )
        })
        .collect()
}

fn entered_keys(events: &[AoiEvent]) -> Vec<(EntityId, EntityKey)> {
    events
        .iter()
        .filter_map(|event| match event {
            AoiEvent::Enter { key, entity, .. } => Some((*entity, *key)),
            _ => None,
        })
        .collect()
}

#[test]
fn membership_follows_the_hysteresis_band() {
    let (mut cluster, log, observer) = setup(false);
    let other = spawn(&mut cluster, 4.9);
    cluster.tick();
    assert_eq!(members(&cluster, observer), vec![other]);
    assert_eq!(
        entered_keys(&membership_events(&log, observer)),
        vec![(other, EntityKey::Id(other))]
    );
    assert!(cluster.cell_mut(1).unwrap().ack_enter(observer, other).unwrap());

    place(&mut cluster, other, 5.3);
    cluster.tick();
    assert_eq!(members(&cluster, observer), vec![other]);
    assert!(membership_events(&log, observer).is_empty());

    place(&mut cluster, other, 6.2);
    cluster.tick();
    assert!(members(&cluster, observer).is_empty());
    assert_eq!(
        membership_events(&log, observer),
        vec![AoiEvent::Leave {
            key: EntityKey::Id(other)
        }]
    );
    cluster.cell_mut(1).unwrap().ack_leave(observer, other).unwrap();

    place(&mut cluster, other, 5.5);
    cluster.tick();
    assert!(members(&cluster, observer).is_empty());

    place(&mut cluster, other, 4.0);
    cluster.tick();
    assert_eq!(members(&cluster, observer), vec![other]);
}

#[test]
fn unacknowledged_enter_holds_the_leave_back() {
    let (mut cluster, log, observer) = setup(false);
    let other = spawn(&mut cluster, 2.0);
    cluster.tick();
    take_events(&log, observer);

    place(&mut cluster, other, 30.0);
    cluster.tick();
    assert_eq!(members(&cluster, observer), vec![other]);
    assert!(membership_events(&log, observer).is_empty());

    cluster.cell_mut(1).unwrap().ack_enter(observer, other).unwrap();
    cluster.tick();
    assert!(members(&cluster, observer).is_empty());
    assert_eq!(
        membership_events(&log, observer),
        vec![AoiEvent::Leave {
            key: EntityKey::Id(other)
        }]
    );
}

#[test]
fn alias_is_not_reused_before_the_leave_is_acknowledged() {
    let (mut cluster, log, observer) = setup(true);
    let first = spawn(&mut cluster, 1.0);
    cluster.tick();
    assert_eq!(
        entered_keys(&membership_events(&log, observer)),
        vec![(first, EntityKey::Alias(0))]
    );
    cluster.cell_mut(1).unwrap().ack_enter(observer, first).unwrap();

    place(&mut cluster, first, 40.0);
    cluster.tick();
    assert_eq!(
        membership_events(&log, observer),
        vec![AoiEvent::Leave {
            key: EntityKey::Alias(0)
        }]
    );

    let second = spawn(&mut cluster, 2.0);
    cluster.tick();
    assert_eq!(
        entered_keys(&membership_events(&log, observer)),
        vec![(second, EntityKey::Alias(1))]
    );

    cluster.cell_mut(1).unwrap().ack_leave(observer, first).unwrap();
    let third = spawn(&mut cluster, 3.0);
    cluster.tick();
    assert_eq!(
        entered_keys(&membership_events(&log, observer)),
        vec![(third, EntityKey::Alias(0))]
    );
}

#[test]
fn leave_ack_for_a_member_triggers_a_full_resend() {
    let (mut cluster, log, observer) = setup(false);
    let a = spawn(&mut cluster, 1.0);
    let b = spawn(&mut cluster, 2.0);
    cluster.tick();
    take_events(&log, observer);
    let cell = cluster.cell_mut(1).unwrap();
    cell.ack_enter(observer, a).unwrap();
    cell.ack_enter(observer, b).unwrap();

    let err = cell.ack_leave(observer, a).unwrap_err();
    assert!(matches!(err, CellError::AoiDesync { observer: o, entity } if o == observer && entity == a));

    cluster.tick();
    let events = membership_events(&log, observer);
    assert_eq!(events.first(), Some(&AoiEvent::Reset));
    assert_eq!(
        entered_keys(&events),
        vec![(a, EntityKey::Id(a)), (b, EntityKey::Id(b))]
    );
    assert_eq!(members(&cluster, observer), vec![a, b]);
}

#[test]
fn acknowledged_members_receive_property_changes() {
    let (mut cluster, log, observer) = setup(false);
    let other = spawn(&mut cluster, 1.0);
    cluster.tick();
    let enter = take_events(&log, observer);
    let properties = enter.iter().find_map(|event| match event {
        AoiEvent::Enter { properties, .. } => Some(properties.clone()),
        _ => None,
    });
    assert_eq!(
        properties,
        Some(vec![(PropertyKey::Id(NICK), PropertyValue::Str("anon".into()))])
    );
    cluster.cell_mut(1).unwrap().ack_enter(observer, other).unwrap();
    cluster.tick();
    take_events(&log, observer);

    let cell = cluster.cell_mut(1).unwrap();
    cell.set_property(other, SECRET, PropertyValue::Int(9)).unwrap();
    cell.set_property(other, NICK, PropertyValue::Str("bob".into())).unwrap();
    cluster.tick();

    let updates: Vec<_> = take_events(&log, observer)
        .into_iter()
        .filter_map(|event| match event {
            AoiEvent::Update { key, properties, .. } => Some((key, properties)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![(
            EntityKey::Id(other),
            vec![(PropertyKey::Id(NICK), PropertyValue::Str("bob".into()))]
        )]
    );
}

#[test]
fn members_past_the_alias_limit_use_full_ids() {
    let (mut cluster, log, observer) = setup(true);
    let crowd: Vec<EntityId> = (0..MAX_ALIASES + 5)
        .map(|n| spawn(&mut cluster, 0.01 * (n + 1) as f32))
        .collect();
    cluster.tick();

    let keys = entered_keys(&membership_events(&log, observer));
    assert_eq!(keys.len(), crowd.len());
    for (n, (id, key)) in keys.iter().enumerate() {
        assert_eq!(*id, crowd[n]);
        if n < MAX_ALIASES {
            assert_eq!(*key, EntityKey::Alias(n as u8));
        } else {
            assert_eq!(*key, EntityKey::Id(*id));
        }
    }

    let late = spawn(&mut cluster, 1.0);
    cluster.cell_mut(1).unwrap().ack_enter(observer, crowd[0]).unwrap();
    cluster.tick();
    let events = take_events(&log, observer);
    assert_eq!(entered_keys(&events), vec![(late, EntityKey::Id(late))]);
    let updated: Vec<EntityKey> = events
        .iter()
        .filter_map(|event| match event {
            AoiEvent::Update { key, .. } => Some(*key),
            _ => None,
        })
        .collect();
    assert_eq!(updated, vec![EntityKey::Alias(0)]);
}

#[test]
fn witnessed_state_follows_membership() {
    let (mut cluster, _log, observer) = setup(false);
    let other = spawn(&mut cluster, 2.0);
    assert!(!cluster.cell(1).unwrap().is_witnessed(other).unwrap());

    cluster.tick();
    let cell = cluster.cell_mut(1).unwrap();
    assert!(cell.is_witnessed(other).unwrap());
    assert!(!cell.is_witnessed(observer).unwrap());
    assert!(matches!(cell.is_witnessed(12_345), Err(CellError::EntityNotFound(12_345))));

    cell.ack_enter(observer, other).unwrap();
    place(&mut cluster, other, 30.0);
    cluster.tick();
    assert!(!cluster.cell(1).unwrap().is_witnessed(other).unwrap());
}

#[test]
fn huge_radius_is_served_and_infinite_refused() {
    let (mut cluster, _log, observer) = setup(false);
    let far = spawn(&mut cluster, 1.0e6);
    let cell = cluster.cell_mut(1).unwrap();
    assert!(matches!(
        cell.set_aoi_radius(observer, f32::INFINITY, 1.0),
        Err(CellError::InvalidRange { .. })
    ));
    cell.set_aoi_radius(observer, 1.0e7, 1.0).unwrap();
    cluster.tick();
    assert_eq!(members(&cluster, observer), vec![far]);

    let cell = cluster.cell(1).unwrap();
    assert_eq!(
        cell.entities_in_range(SPACE, Vec3::ZERO, 2.0e7).unwrap(),
        vec![observer, far]
    );
    assert!(matches!(
        cell.entities_in_range(SPACE, Vec3::ZERO, f32::INFINITY),
        Err(CellError::InvalidRange { .. })
    ));
}
