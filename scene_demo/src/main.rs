//! Orbiting scene demo
//!
//! Builds a small star system as a transform hierarchy, plugs a logging video
//! driver into the entity manager and steps a fixed number of frames.
//!
//! Usage: `scene_demo [config.toml|config.ron] [frames]`

use ecs_runtime::ecs::systems::CullingSystem;
use ecs_runtime::foundation::math::{compose, Quat};
use ecs_runtime::prelude::*;
use rand::Rng;
use std::f32::consts::TAU;

const PLANETS: usize = 4;
const MOONS_PER_PLANET: usize = 2;
const DEFAULT_FRAMES: u32 = 120;
const FRAME_TIME: f32 = 1.0 / 60.0;

/// Errors surfaced by the demo
#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Ecs(#[from] EcsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid frame count: {0}")]
    Frames(String),
}

/// Video driver that logs draw calls and counts them per frame
#[derive(Debug, Default)]
struct LoggingDriver {
    draws: usize,
    material: Option<MaterialId>,
}

impl VideoDriver for LoggingDriver {
    fn set_transform(&mut self, state: TransformState, matrix: &Mat4) {
        if state == TransformState::World {
            log::trace!("world at ({:.2}, {:.2}, {:.2})", matrix.m14, matrix.m24, matrix.m34);
        }
    }

    fn set_material(&mut self, material: MaterialId) {
        self.material = Some(material);
    }

    fn draw_mesh_buffer(&mut self, mesh_buffer: MeshBufferId) {
        self.draws += 1;
        log::trace!("draw {:?} with {:?}", mesh_buffer, self.material);
    }
}

/// Spins pivot entities around the Y axis
#[derive(Debug, Default)]
struct OrbitSystem {
    orbits: Vec<Orbit>,
}

#[derive(Debug, Clone, Copy)]
struct Orbit {
    pivot: EntityHandle,
    angle: f32,
    speed: f32,
}

impl EntitySystem for OrbitSystem {
    fn update(&mut self, manager: &mut EntityManager) {
        for orbit in &mut self.orbits {
            orbit.angle = (orbit.angle + orbit.speed * FRAME_TIME) % TAU;
            let rotation = Quat::from_axis_angle(&Vec3::y_axis(), orbit.angle);
            if let Some(transform) = manager.get_data_mut::<WorldTransformData>(orbit.pivot) {
                transform.set_relative_trs(&Vec3::zeros(), &rotation, &Vec3::new(1.0, 1.0, 1.0));
            }
        }
    }
}

/// Create a spinning pivot below `parent` with a body at `radius`
fn spawn_body(
    manager: &mut EntityManager,
    orbits: &mut Vec<Orbit>,
    parent: Option<EntityHandle>,
    name: &str,
    radius: f32,
    size: f32,
    mesh: MeshBufferId,
) -> Result<EntityHandle, DemoError> {
    let mut rng = rand::thread_rng();

    let pivot = manager.create_entity();
    manager.set_entity_id(pivot, Some(format!("{name}_pivot").as_str()))?;
    manager.add_transform_data(pivot, parent, Mat4::identity())?;
    orbits.push(Orbit {
        pivot,
        angle: rng.gen_range(0.0..TAU),
        speed: rng.gen_range(0.2..1.5),
    });

    let body = manager.create_entity();
    manager.set_entity_id(body, Some(name))?;
    let scale = Vec3::new(size, size, size);
    let relative = compose(&Vec3::new(radius, 0.0, 0.0), &Quat::identity(), &scale);
    manager.add_transform_data(body, Some(pivot), relative)?;
    manager.insert_data(body, RenderMeshData::opaque(mesh, MaterialId(1)))?;
    manager.insert_data(
        body,
        CullingData::new(Aabb::from_center_extents(Point3::origin(), Vec3::new(1.0, 1.0, 1.0))),
    )?;
    manager.add_data::<VisibleData>(body)?;
    Ok(body)
}

fn build_scene(manager: &mut EntityManager) -> Result<(), DemoError> {
    let mut orbits = Vec::new();

    let star = manager.create_entity();
    manager.set_entity_id(star, Some("star"))?;
    manager.add_transform_data(star, None, Mat4::identity())?;
    manager.insert_data(
        star,
        RenderMeshData {
            emissive: true,
            ..RenderMeshData::opaque(MeshBufferId(0), MaterialId(0))
        },
    )?;
    manager.insert_data(star, LightData::point(Vec3::new(1.0, 0.9, 0.7), 4.0, 200.0))?;

    let sun = manager.create_entity();
    manager.insert_data(
        sun,
        LightData::directional(Vec3::new(-0.3, -1.0, 0.2), Vec3::new(1.0, 1.0, 1.0), 0.5),
    )?;

    for p in 0..PLANETS {
        let radius = 20.0 * (p + 1) as f32;
        let planet = spawn_body(manager, &mut orbits, Some(star), &format!("planet{p}"), radius, 2.0, MeshBufferId(1))?;
        for m in 0..MOONS_PER_PLANET {
            spawn_body(
                manager,
                &mut orbits,
                Some(planet),
                &format!("planet{p}_moon{m}"),
                4.0 + 2.0 * m as f32,
                0.5,
                MeshBufferId(2),
            )?;
        }
    }

    // A glass satellite that rides along with the first planet
    if let Some(first) = manager.entity_by_id("planet0") {
        let satellite = manager.create_entity();
        manager.add_transform_data(satellite, None, translation(0.0, 3.0, 0.0))?;
        manager.insert_data(satellite, RenderMeshData::transparent(MeshBufferId(3), MaterialId(2)))?;
        manager.attach_transform(satellite, Some(first))?;
    }

    log::info!("Scene has {} entities and {} orbits", manager.alive_count(), orbits.len());
    manager.add_system_with(OrbitSystem { orbits })?;
    // Orbits move pivots before transforms are propagated.
    manager.set_system_order::<OrbitSystem>(-1);
    Ok(())
}

fn run() -> Result<(), DemoError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            log::info!("Loading manager config from {}", path);
            EntityManagerConfig::load_from_file(&path)?
        }
        None => EntityManagerConfig::default(),
    };
    let frames = match args.next() {
        Some(value) => value.parse::<u32>().map_err(|_| DemoError::Frames(value))?,
        None => DEFAULT_FRAMES,
    };

    // Returns the built-ins when the config already registered them.
    let mut manager = EntityManager::with_config(config)?;
    manager.add_system::<WorldTransformSystem>()?;
    manager.add_system::<LightSystem>()?;
    manager.add_render_system::<CullingSystem>()?;
    manager.add_render_system::<MeshRenderer>()?;
    manager.set_video_driver(Box::new(LoggingDriver::default()));
    manager.set_view_box(Some(Aabb::from_center_extents(
        Point3::origin(),
        Vec3::new(60.0, 20.0, 60.0),
    )));

    build_scene(&mut manager)?;

    for frame in 0..frames {
        manager.update()?;
        manager.render();
        manager.render_emission();

        if frame % 30 == 0 {
            let draws = manager
                .with_video_driver(|driver, _| {
                    driver
                        .as_any_mut()
                        .downcast_mut::<LoggingDriver>()
                        .map_or(0, |d| std::mem::take(&mut d.draws))
                })
                .unwrap_or(0);
            let lights = manager.get_system::<LightSystem>().map_or(0, |s| s.lights().len());
            let visible = manager
                .get_render_system::<CullingSystem>()
                .map_or(0, CullingSystem::visible_count);
            log::info!(
                "frame {:>4}: {} draw calls since last report, {} visible, {} lights",
                frame,
                draws,
                visible,
                lights
            );
        }
    }

    let stale = manager.stale_parent_references();
    if !stale.is_empty() {
        log::warn!("{} entities still link to removed parents", stale.len());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting scene demo");
    match run() {
        Ok(()) => log::info!("Scene demo completed successfully"),
        Err(e) => {
            log::error!("Scene demo failed: {}", e);
            std::process::exit(1);
        }
    }
}
