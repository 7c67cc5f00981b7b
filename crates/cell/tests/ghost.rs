use glam::Vec3;

use cellmesh::witness::NullSink;
use cellmesh::{
    CallOutcome, Caller, CellConfig, CellError, CellEvent, Cluster, Direction3D, EntityDef,
    EntityDefs, EntityId, NeighborCell, NullPersistence, PropertyFlags, PropertyValue,
    RecordingRuntime,
};

const AVATAR: u16 = 1;
const SPACE: u32 = 1;
const HP: u16 = 1;
const PLAN: u16 = 2;
const PING: u16 = 1;
const SECRET: u16 = 2;

/// Process 1 hosts x in [0, 100], process 2 hosts x in [100, 200]; both share space 1.
fn two_cells() -> Cluster {
    let defs = EntityDefs::new().with(
        EntityDef::new(AVATAR, "Avatar")
            .with_property(HP, "hp", PropertyFlags::CELL_PUBLIC, PropertyValue::Int(100))
            .with_property(PLAN, "plan", PropertyFlags::CELL_PRIVATE, PropertyValue::Int(0))
            .with_method(PING, "ping", true)
            .with_method(SECRET, "secret", false)
            .with_all_hooks(),
    );
    let mut config = CellConfig::default();
    config.ghost.ghost_distance = 20.0;
    config.ghost.ghost_hysteresis = 5.0;
    config.ghost.check_interval_ticks = 1;
    let mut cluster = Cluster::new(config, defs);
    for (process, neighbor, min_x) in [(1, 2, 100.0), (2, 1, 0.0)] {
        let cell = cluster.add_cell_with(
            process,
            Box::new(RecordingRuntime::new()),
            Box::new(NullSink),
            Box::new(NullPersistence),
        );
        cell.create_space(SPACE, "plane");
        cell.add_neighbor(
            SPACE,
            NeighborCell::new(neighbor, [min_x, 0.0], [min_x + 100.0, 100.0]),
        )
        .unwrap();
    }
    cluster
}

fn spawn(cluster: &mut Cluster, x: f32) -> EntityId {
    cluster
        .create_entity(
            1,
            AVATAR,
            SPACE,
            Vec3::new(x, 0.0, 50.0),
            Direction3D::default(),
            Vec::new(),
        )
        .unwrap()
}

fn ghost_owner(cluster: &Cluster, process: u32, id: EntityId) -> Option<u32> {
    cluster.cell(process)?.arena().get(id)?.ghost_owner()
}

#[test]
fn entities_near_the_boundary_are_ghosted_and_released() {
    let mut cluster = two_cells();
    let near = spawn(&mut cluster, 90.0);
    let far = spawn(&mut cluster, 20.0);
    cluster.run(2);

    assert_eq!(ghost_owner(&cluster, 2, near), Some(1));
    assert!(cluster.cell(2).unwrap().arena().get(far).is_none());
    let events = cluster.cell_mut(2).unwrap().drain_events();
    assert!(events.contains(&CellEvent::GhostCreated {
        entity: near,
        owner: 1
    }));

    // Inside the hysteresis band the ghost stays.
    cluster
        .cell_mut(1)
        .unwrap()
        .set_position(near, Vec3::new(77.0, 0.0, 50.0))
        .unwrap();
    cluster.run(2);
    assert_eq!(ghost_owner(&cluster, 2, near), Some(1));
    let ghost = cluster.cell(2).unwrap().arena().get(near).unwrap();
    assert_eq!(ghost.position, Vec3::new(77.0, 0.0, 50.0));

    cluster
        .cell_mut(1)
        .unwrap()
        .set_position(near, Vec3::new(60.0, 0.0, 50.0))
        .unwrap();
    cluster.run(2);
    assert!(cluster.cell(2).unwrap().arena().get(near).is_none());
    assert!(
        cluster
            .cell_mut(2)
            .unwrap()
            .drain_events()
            .contains(&CellEvent::GhostDestroyed { entity: near })
    );
}

#[test]
fn ghosts_follow_public_property_changes() {
    let mut cluster = two_cells();
    let id = spawn(&mut cluster, 95.0);
    cluster.run(2);
    assert_eq!(
        cluster.cell(2).unwrap().property(id, HP),
        Some(&PropertyValue::Int(100))
    );
    assert_eq!(cluster.cell(2).unwrap().property(id, PLAN), None);

    let cell = cluster.cell_mut(1).unwrap();
    cell.set_property(id, HP, PropertyValue::Int(55)).unwrap();
    cell.set_property(id, PLAN, PropertyValue::Int(3)).unwrap();
    cluster.run(2);

    assert_eq!(
        cluster.cell(2).unwrap().property(id, HP),
        Some(&PropertyValue::Int(55))
    );
    assert_eq!(cluster.cell(2).unwrap().property(id, PLAN), None);
}

#[test]
fn exposed_calls_on_a_ghost_reach_the_real() {
    let mut cluster = two_cells();
    let id = spawn(&mut cluster, 90.0);
    cluster.run(2);

    let call = match cluster
        .cell_mut(2)
        .unwrap()
        .call_method(id, PING, Caller::client(id), vec![PropertyValue::Int(8)])
        .unwrap()
    {
        CallOutcome::Forwarded(call) => call,
        other => panic!("ghost answered a call itself: {:?}", other),
    };
    cluster.run(3);

    let replies: Vec<_> = cluster
        .cell_mut(2)
        .unwrap()
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, CellEvent::CallReply { .. }))
        .collect();
    assert_eq!(
        replies,
        vec![CellEvent::CallReply {
            call,
            result: Ok(vec![PropertyValue::Int(8)]),
        }]
    );
}

#[test]
fn ghost_refuses_hidden_and_unknown_targets() {
    let mut cluster = two_cells();
    let id = spawn(&mut cluster, 90.0);
    cluster.run(2);
    let cell = cluster.cell_mut(2).unwrap();

    let err = cell
        .call_method(id, SECRET, Caller::server(0), Vec::new())
        .unwrap_err();
    assert!(matches!(err, CellError::MethodNotExposed { entity, method: SECRET } if entity == id));

    let err = cell
        .call_method(9_999, PING, Caller::server(0), Vec::new())
        .unwrap_err();
    assert!(matches!(err, CellError::RouteNotFound { entity: 9_999 }));
}

#[test]
fn migrating_onto_a_ghost_holder_swaps_the_roles() {
    let mut cluster = two_cells();
    let id = spawn(&mut cluster, 95.0);
    cluster
        .cell_mut(1)
        .unwrap()
        .set_property(id, HP, PropertyValue::Int(70))
        .unwrap();
    cluster.run(2);
    assert_eq!(ghost_owner(&cluster, 2, id), Some(1));

    cluster
        .cell_mut(1)
        .unwrap()
        .teleport(id, 2, SPACE, Vec3::new(105.0, 0.0, 50.0), Direction3D::default())
        .unwrap();
    assert!(cluster.run_until(10, |c| c.real_holders(id) == vec![2]));
    cluster.run(3);

    let real = cluster.cell(2).unwrap().arena().get_real(id).unwrap();
    assert_eq!(real.position, Vec3::new(105.0, 0.0, 50.0));
    assert_eq!(real.properties.get(HP), Some(&PropertyValue::Int(70)));
    assert_eq!(ghost_owner(&cluster, 1, id), Some(2));
    assert_eq!(cluster.real_holders(id), vec![2]);
}

#[test]
fn ghosts_of_a_departed_owner_are_dropped() {
    let mut cluster = two_cells();
    let id = spawn(&mut cluster, 90.0);
    cluster.run(2);
    assert_eq!(ghost_owner(&cluster, 2, id), Some(1));
    cluster.cell_mut(2).unwrap().drain_events();

    cluster.remove_cell(1);
    cluster.tick();

    let cell = cluster.cell_mut(2).unwrap();
    assert!(cell.arena().get(id).is_none());
    assert!(cell.drain_events().contains(&CellEvent::GhostDestroyed { entity: id }));
    let err = cell
        .call_method(id, PING, Caller::server(0), Vec::new())
        .unwrap_err();
    assert!(matches!(err, CellError::RouteNotFound { entity } if entity == id));
}
