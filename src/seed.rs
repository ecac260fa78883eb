//! Fixed catalog written on first start.

use crate::engine::{Actor, Engine, EngineError};
use crate::model::{EquipmentKind, Space, SpaceCategory};

const UPPER_FLOOR: &str = "Building F - Upper floor";
const GROUND_FLOOR: &str = "Building F - Ground floor";

const EQUIPMENT: &[(&str, &str)] = &[
    ("eq_tv", "Smart TV 55\""),
    ("eq_pizarron", "Whiteboard"),
    ("eq_proyector", "HD projector"),
    ("eq_pc", "Desktop PC"),
    ("eq_restirador", "Drawing table"),
    ("eq_birrete", "High stool"),
    ("eq_camara", "4K video camera"),
    ("eq_green_screen", "Green screen"),
    ("eq_luces", "Lighting kit"),
    ("eq_mic", "Boom microphone"),
    ("eq_mesa_juntas", "Boardroom table"),
    ("eq_router", "Cisco router"),
    ("eq_switch", "24-port switch"),
    ("eq_cable_utp", "UTP cable"),
    ("eq_cable_consola", "Console cable"),
    ("eq_cable_serial", "Serial cable"),
    ("eq_cable_fibra", "Fiber optic cable"),
    ("eq_servidor", "Rack server"),
];

fn space(
    id: &str,
    name: &str,
    category: SpaceCategory,
    capacity: u32,
    location: &str,
    description: &str,
) -> Space {
    Space {
        id: id.into(),
        name: name.into(),
        category,
        capacity,
        location: location.into(),
        description: description.into(),
        active: true,
    }
}

pub fn spaces() -> Vec<Space> {
    let mut list = Vec::new();
    for i in 1..=12 {
        let floor = if i == 12 { GROUND_FLOOR } else { UPPER_FLOOR };
        list.push(space(
            &format!("aula_{i}"),
            &format!("Room {i}"),
            SpaceCategory::Room,
            30,
            floor,
            "Standard classroom with smart TV and whiteboard.",
        ));
    }
    for i in 1..=4 {
        list.push(space(
            &format!("lab_{i}"),
            &format!("Lab {i}"),
            SpaceCategory::Lab,
            25,
            GROUND_FLOOR,
            "General computing lab.",
        ));
    }
    list.push(space(
        "taller_dibujo_1",
        "Drawing Workshop 1",
        SpaceCategory::Workshop,
        30,
        UPPER_FLOOR,
        "Technical drawing.",
    ));
    list.push(space(
        "taller_dibujo_2",
        "Drawing Workshop 2",
        SpaceCategory::Workshop,
        30,
        GROUND_FLOOR,
        "Technical drawing.",
    ));
    list.push(space(
        "sala_audiovisual",
        "Audiovisual Room",
        SpaceCategory::Auditorium,
        50,
        GROUND_FLOOR,
        "Auditorium for talks.",
    ));
    list.push(space(
        "sala_juntas",
        "Meeting Room",
        SpaceCategory::MeetingRoom,
        20,
        UPPER_FLOOR,
        "Executive meeting space.",
    ));
    list.push(space(
        "sala_rodajes",
        "Production Studio",
        SpaceCategory::Studio,
        5,
        GROUND_FLOOR,
        "Recording studio.",
    ));
    list.push(space(
        "lab_wan",
        "WAN Lab",
        SpaceCategory::Lab,
        20,
        GROUND_FLOOR,
        "Networking lab.",
    ));
    list.push(space(
        "lab_seguridad",
        "Security Lab",
        SpaceCategory::Lab,
        15,
        UPPER_FLOOR,
        "Cybersecurity lab.",
    ));
    list
}

pub fn equipment() -> Vec<EquipmentKind> {
    EQUIPMENT
        .iter()
        .map(|(id, name)| EquipmentKind {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// (space, equipment, quantity)
pub fn links() -> Vec<(String, &'static str, u32)> {
    let mut list = Vec::new();
    for i in 1..=12 {
        let id = format!("aula_{i}");
        list.push((id.clone(), "eq_tv", 1));
        list.push((id, "eq_pizarron", 1));
    }
    for i in 1..=4 {
        let id = format!("lab_{i}");
        list.push((id.clone(), "eq_pizarron", 1));
        list.push((id.clone(), "eq_proyector", 1));
        list.push((id, "eq_pc", 25));
    }
    for i in 1..=2 {
        let id = format!("taller_dibujo_{i}");
        for (eq, qty) in [
            ("eq_tv", 1),
            ("eq_pizarron", 1),
            ("eq_proyector", 1),
            ("eq_restirador", 30),
            ("eq_birrete", 30),
        ] {
            list.push((id.clone(), eq, qty));
        }
    }
    let fixed: &[(&str, &str, u32)] = &[
        ("sala_audiovisual", "eq_proyector", 1),
        ("sala_audiovisual", "eq_pizarron", 1),
        ("sala_rodajes", "eq_camara", 3),
        ("sala_rodajes", "eq_green_screen", 1),
        ("sala_rodajes", "eq_luces", 4),
        ("sala_rodajes", "eq_mic", 2),
        ("sala_juntas", "eq_mesa_juntas", 1),
        ("lab_wan", "eq_pc", 10),
        ("lab_wan", "eq_router", 10),
        ("lab_wan", "eq_switch", 17),
        ("lab_wan", "eq_cable_utp", 4),
        ("lab_wan", "eq_cable_consola", 4),
        ("lab_wan", "eq_cable_serial", 4),
        ("lab_wan", "eq_cable_fibra", 4),
        ("lab_seguridad", "eq_pc", 10),
        ("lab_seguridad", "eq_servidor", 1),
    ];
    list.extend(fixed.iter().map(|(s, e, q)| (s.to_string(), *e, *q)));
    list
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub spaces: usize,
    pub equipment: usize,
    pub links: usize,
}

/// Write the fixed spaces if there are none, and the fixed equipment with its
/// links if there is none. Links to spaces that no longer exist are skipped.
pub async fn seed_catalog(engine: &Engine) -> Result<SeedReport, EngineError> {
    let mut report = SeedReport::default();
    let actor = Actor::System;

    if engine.spaces_count() == 0 {
        for s in spaces() {
            engine.create_space(&actor, s).await?;
            report.spaces += 1;
        }
    }

    if engine.equipment_count() == 0 {
        for kind in equipment() {
            engine.add_equipment_kind(&actor, kind).await?;
            report.equipment += 1;
        }
        for (space_id, equipment_id, quantity) in links() {
            match engine.link_equipment(&actor, &space_id, equipment_id, quantity).await {
                Ok(()) => report.links += 1,
                Err(EngineError::NotFound("space", _)) => {
                    tracing::debug!("seed: skipping link for missing space {space_id}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    if report != SeedReport::default() {
        tracing::info!(
            "seeded {} spaces, {} equipment kinds, {} links",
            report.spaces,
            report.equipment,
            report.links
        );
    }
    Ok(report)
}

/// Create the configured administrator unless that email is already taken.
pub async fn seed_admin(engine: &Engine, email: &str, password: &str) -> Result<(), EngineError> {
    if engine.bootstrap_admin(email, password).await? {
        tracing::info!("created administrator {email}");
    }
    Ok(())
}
