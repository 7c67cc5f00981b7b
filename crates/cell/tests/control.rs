use glam::Vec3;

use cellmesh::script::{hooks_for, ScriptLog};
use cellmesh::witness::{take_events, PacketLog};
use cellmesh::{
    AoiEvent, CellApp, CellConfig, CellError, Cluster, Direction3D, EntityDef, EntityDefs,
    EntityId, Hook, NullPersistence, RecordingRuntime, RecordingSink,
};

const AVATAR: u16 = 1;
const SPACE: u32 = 1;

struct World {
    cluster: Cluster,
    packets: PacketLog,
    script: ScriptLog,
    observer: EntityId,
    avatar: EntityId,
}

impl World {
    fn cell(&mut self) -> &mut CellApp {
        self.cluster.cell_mut(1).unwrap()
    }

    fn avatar_position(&self) -> Vec3 {
        self.cluster
            .cell(1)
            .unwrap()
            .arena()
            .get_real(self.avatar)
            .unwrap()
            .position
    }

    fn lost_control(&self) -> usize {
        hooks_for(&self.script, self.avatar)
            .iter()
            .filter(|hook| **hook == Hook::OnLoseControlledBy { controller: self.observer })
            .count()
    }
}

fn setup() -> World {
    let defs = EntityDefs::new().with(EntityDef::new(AVATAR, "Avatar").with_all_hooks());
    let mut cluster = Cluster::new(CellConfig::default(), defs);
    let runtime = RecordingRuntime::new();
    let script = runtime.log();
    let sink = RecordingSink::new();
    let packets = sink.log();
    cluster
        .add_cell_with(1, Box::new(runtime), Box::new(sink), Box::new(NullPersistence))
        .create_space(SPACE, "plane");
    let mut spawn = |x: f32| {
        cluster
            .create_entity(1, AVATAR, SPACE, Vec3::new(x, 0.0, 0.0), Direction3D::default(), Vec::new())
            .unwrap()
    };
    let observer = spawn(0.0);
    let avatar = spawn(3.0);
    let cell = cluster.cell_mut(1).unwrap();
    cell.attach_witness(observer).unwrap();
    cell.set_aoi_radius(observer, 50.0, 5.0).unwrap();
    World {
        cluster,
        packets,
        script,
        observer,
        avatar,
    }
}

#[test]
fn client_moves_are_checked_against_controller_and_speed() {
    let mut world = setup();
    let (observer, avatar) = (world.observer, world.avatar);
    let cell = world.cell();
    cell.set_controlled_by(avatar, Some(observer)).unwrap();
    // 20 per second at 10 ticks per second.
    cell.set_top_speed(avatar, 20.0, 0.0).unwrap();

    cell.on_update_from_client(avatar, 9_999, Vec3::new(4.0, 0.0, 0.0), Direction3D::default(), true)
        .unwrap();
    assert_eq!(world.avatar_position(), Vec3::new(3.0, 0.0, 0.0));

    world
        .cell()
        .on_update_from_client(avatar, observer, Vec3::new(4.5, 0.0, 0.0), Direction3D::default(), true)
        .unwrap();
    assert_eq!(world.avatar_position(), Vec3::new(4.5, 0.0, 0.0));
    world.cluster.tick();
    let forced = |events: Vec<AoiEvent>| {
        events
            .into_iter()
            .filter_map(|event| match event {
                AoiEvent::ForcePosition { entity, position, .. } => Some((entity, position)),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    assert!(forced(take_events(&world.packets, observer)).is_empty());

    world
        .cell()
        .on_update_from_client(avatar, observer, Vec3::new(40.0, 0.0, 0.0), Direction3D::default(), true)
        .unwrap();
    assert_eq!(world.avatar_position(), Vec3::new(4.5, 0.0, 0.0));
    world.cluster.tick();
    assert_eq!(
        forced(take_events(&world.packets, observer)),
        vec![(avatar, [4.5, 0.0, 0.0])]
    );
}

#[test]
fn control_needs_a_witness_and_is_given_back() {
    let mut world = setup();
    let (observer, avatar) = (world.observer, world.avatar);
    let cell = world.cell();

    let err = cell.set_controlled_by(observer, Some(avatar)).unwrap_err();
    assert!(matches!(err, CellError::NoWitness(e) if e == avatar));

    cell.set_controlled_by(avatar, Some(observer)).unwrap();
    cell.set_controlled_by(avatar, None).unwrap();
    assert_eq!(world.lost_control(), 1);
    assert_eq!(
        world.cluster.cell(1).unwrap().arena().get_real(avatar).unwrap().controlled_by,
        None
    );

    world.cell().set_controlled_by(avatar, Some(observer)).unwrap();
    world.cell().detach_witness(observer).unwrap();
    assert_eq!(world.lost_control(), 2);
    assert_eq!(
        world.cluster.cell(1).unwrap().arena().get_real(avatar).unwrap().controlled_by,
        None
    );

    // The former controller no longer steers the avatar.
    world
        .cell()
        .on_update_from_client(avatar, observer, Vec3::new(3.5, 0.0, 0.0), Direction3D::default(), true)
        .unwrap();
    assert_eq!(world.avatar_position(), Vec3::new(3.0, 0.0, 0.0));
}
