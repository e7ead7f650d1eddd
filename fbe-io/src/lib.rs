use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use fbe_core::catalog::{Catalog, Category, is_train_kind};
use fbe_core::document::{
    Blueprint, Book, DirectionType, Document, Entity, EntityId, Link, LinkKind, WireColor,
};
use fbe_core::grid::{Cell, Direction, Position};

/// 交换字符串携带的格式版本号，对应 1.1.61.0。编码时原样写出，
/// 解码时不做解释。
pub const WIRE_VERSION: u64 = (1 << 48) | (1 << 32) | (61 << 16);

const VERSION_MARKER: char = '0';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid exchange string: {0}")]
    InvalidFormat(String),
    #[error("blueprint contains train content: {kinds:?}")]
    UnsupportedTrainBlueprint { kinds: Vec<String> },
    #[error("blueprint contains modded content: {kinds:?}")]
    UnsupportedModdedContent { kinds: Vec<String> },
}

impl CodecError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }
}

/// 文档是否为空。空文档可以正常编码，不是错误。
pub fn is_empty(document: &Document) -> bool {
    document.is_empty()
}

/// 解码交换字符串：`'0' + base64(zlib(JSON))`。
///
/// 目录校验在构建文档之前完成：所有未知名字先收集齐，再按
/// 火车族优先的规则分类上报，因此调用方一次就能看到完整清单。
pub fn decode(raw: &str) -> Result<Document, CodecError> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(VERSION_MARKER) => {}
        Some(other) => {
            return Err(CodecError::invalid(format!(
                "unsupported version marker {other:?}"
            )));
        }
        None => return Err(CodecError::invalid("empty exchange string")),
    }

    let compressed = BASE64
        .decode(chars.as_str())
        .map_err(|err| CodecError::invalid(format!("base64 解码失败: {err}")))?;

    let mut payload = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut payload)
        .map_err(|err| CodecError::invalid(format!("zlib 解压失败: {err}")))?;

    let envelope: WireEnvelope = serde_json::from_slice(&payload)
        .map_err(|err| CodecError::invalid(format!("JSON 解析失败: {err}")))?;

    match (envelope.blueprint, envelope.blueprint_book) {
        (Some(blueprint), None) => {
            check_catalog(std::slice::from_ref(&blueprint))?;
            Ok(Document::Blueprint(build_blueprint(&blueprint)?))
        }
        (None, Some(book)) => {
            let mut entries = book.blueprints;
            entries.sort_by_key(|entry| entry.index);
            let wire_blueprints: Vec<&WireBlueprint> =
                entries.iter().map(|entry| &entry.blueprint).collect();
            check_catalog_refs(&wire_blueprints)?;

            let mut built = Book::new(book.label.unwrap_or_default());
            for entry in &entries {
                built.push(build_blueprint(&entry.blueprint)?);
            }
            built.get_blueprint(Some(book.active_index.unwrap_or(0)));
            Ok(Document::Book(built))
        }
        (Some(_), Some(_)) => Err(CodecError::invalid(
            "both blueprint and blueprint_book present",
        )),
        (None, None) => Err(CodecError::invalid(
            "neither blueprint nor blueprint_book present",
        )),
    }
}

/// 编码为交换字符串。导出序号按遍历顺序从 1 起分配，结果对同一
/// 文档是确定的。
pub fn encode(document: &Document) -> Result<String, CodecError> {
    let envelope = match document {
        Document::Blueprint(blueprint) => WireEnvelope {
            blueprint: Some(export_blueprint(blueprint)),
            blueprint_book: None,
        },
        Document::Book(book) => WireEnvelope {
            blueprint: None,
            blueprint_book: Some(WireBook {
                item: "blueprint-book".to_string(),
                label: Some(book.label().to_string()).filter(|label| !label.is_empty()),
                blueprints: book
                    .blueprints()
                    .enumerate()
                    .map(|(index, blueprint)| WireBookEntry {
                        index,
                        blueprint: export_blueprint(blueprint),
                    })
                    .collect(),
                active_index: Some(book.active_index()),
                version: WIRE_VERSION,
            }),
        },
    };

    let payload = serde_json::to_vec(&envelope)
        .map_err(|err| CodecError::invalid(format!("JSON 序列化失败: {err}")))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&payload)
        .and_then(|_| encoder.finish())
        .map(|compressed| format!("{VERSION_MARKER}{}", BASE64.encode(compressed)))
        .map_err(|err| CodecError::invalid(format!("zlib 压缩失败: {err}")))
}

// ---------------------------------------------------------------------------
// 线上 JSON 模式
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    blueprint: Option<WireBlueprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blueprint_book: Option<WireBook>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBlueprint {
    item: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    icons: Vec<WireIcon>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entities: Vec<WireEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tiles: Vec<WireTile>,
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntity {
    entity_number: u64,
    name: String,
    position: WirePosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<u8>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    direction_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connections: Option<BTreeMap<String, WireConnectionPoint>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    neighbours: Vec<u64>,
    #[serde(flatten)]
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePosition {
    x: f64,
    y: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireConnectionPoint {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    red: Vec<WireConnRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    green: Vec<WireConnRef>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireConnRef {
    entity_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTile {
    name: String,
    position: WirePosition,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireIcon {
    index: u32,
    signal: WireSignal,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSignal {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBook {
    item: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blueprints: Vec<WireBookEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_index: Option<usize>,
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBookEntry {
    index: usize,
    blueprint: WireBlueprint,
}

// ---------------------------------------------------------------------------
// 解码
// ---------------------------------------------------------------------------

fn check_catalog(blueprints: &[WireBlueprint]) -> Result<(), CodecError> {
    let refs: Vec<&WireBlueprint> = blueprints.iter().collect();
    check_catalog_refs(&refs)
}

/// 扫描所有蓝图里的实体、地块与图标名字。未知名字按首次出现顺序
/// 收集去重；火车族的判定优先于模组内容。
fn check_catalog_refs(blueprints: &[&WireBlueprint]) -> Result<(), CodecError> {
    let catalog = Catalog::builtin();
    let mut train_kinds: Vec<String> = Vec::new();
    let mut unknown_kinds: Vec<String> = Vec::new();
    let mut note = |name: &str| {
        if catalog.lookup(name).is_some() {
            return;
        }
        let bucket: &mut Vec<String> = if is_train_kind(name) {
            &mut train_kinds
        } else {
            &mut unknown_kinds
        };
        if !bucket.iter().any(|known| known == name) {
            bucket.push(name.to_string());
        }
    };

    for blueprint in blueprints {
        for entity in &blueprint.entities {
            note(&entity.name);
        }
        for tile in &blueprint.tiles {
            note(&tile.name);
        }
        for icon in &blueprint.icons {
            note(&icon.signal.name);
        }
    }

    if !train_kinds.is_empty() {
        return Err(CodecError::UnsupportedTrainBlueprint { kinds: train_kinds });
    }
    if !unknown_kinds.is_empty() {
        return Err(CodecError::UnsupportedModdedContent {
            kinds: unknown_kinds,
        });
    }
    Ok(())
}

fn build_blueprint(wire: &WireBlueprint) -> Result<Blueprint, CodecError> {
    let mut blueprint = Blueprint::new(wire.label.clone().unwrap_or_default());
    if let Some(description) = &wire.description {
        blueprint.set_description(description.clone());
    }
    blueprint.set_icons(
        wire.icons
            .iter()
            .map(|icon| icon.signal.name.clone())
            .collect(),
    );

    // 第一遍：导出序号 → 新分配的内部标识
    let mut id_of = BTreeMap::new();
    for (slot, wire_entity) in wire.entities.iter().enumerate() {
        let id = EntityId::new(slot as u64);
        if id_of.insert(wire_entity.entity_number, id).is_some() {
            return Err(CodecError::invalid(format!(
                "duplicate entity_number {}",
                wire_entity.entity_number
            )));
        }

        let direction = match wire_entity.direction {
            None => Direction::North,
            Some(raw) => Direction::from_raw(raw).ok_or_else(|| {
                CodecError::invalid(format!("direction {raw} out of range for {}", wire_entity.name))
            })?,
        };
        let direction_type = match &wire_entity.direction_type {
            None => None,
            Some(raw) => Some(DirectionType::from_wire(raw).ok_or_else(|| {
                CodecError::invalid(format!("unknown direction type {raw:?}"))
            })?),
        };
        let entity = Entity {
            kind: wire_entity.name.clone(),
            position: Position::new(wire_entity.position.x, wire_entity.position.y),
            direction,
            direction_type,
            properties: wire_entity.properties.clone(),
            links: Vec::new(),
        };
        blueprint
            .insert_entity(id, entity)
            .map_err(|err| CodecError::invalid(err.to_string()))?;
    }

    // 第二遍：引用已全部可解析，恢复连接边
    for wire_entity in &wire.entities {
        let source = id_of[&wire_entity.entity_number];
        if let Some(connections) = &wire_entity.connections {
            for point in connections.values() {
                for (refs, color) in [(&point.red, WireColor::Red), (&point.green, WireColor::Green)]
                {
                    for conn in refs {
                        let target = resolve(&id_of, conn.entity_id)?;
                        blueprint
                            .link(source, target, LinkKind::Signal(color))
                            .map_err(|err| CodecError::invalid(err.to_string()))?;
                    }
                }
            }
        }
        for neighbour in &wire_entity.neighbours {
            // 边在两端各出现一次，只处理序号更大的那一侧
            if *neighbour <= wire_entity.entity_number {
                continue;
            }
            let target = resolve(&id_of, *neighbour)?;
            let Some(kind) = untyped_link_kind(&blueprint, source, target) else {
                continue;
            };
            match kind {
                // 传送带边有方向性，线上记录不区分哪端是上游
                LinkKind::Transport => {
                    blueprint
                        .link(source, target, kind)
                        .or_else(|_| blueprint.link(target, source, kind))
                        .map_err(|err| CodecError::invalid(err.to_string()))?;
                }
                _ => {
                    blueprint
                        .link(source, target, kind)
                        .map_err(|err| CodecError::invalid(err.to_string()))?;
                }
            }
        }
    }

    for wire_tile in &wire.tiles {
        let cell = Cell::new(
            wire_tile.position.x.floor() as i32,
            wire_tile.position.y.floor() as i32,
        );
        blueprint
            .set_tile(cell, &wire_tile.name)
            .map_err(|err| CodecError::invalid(err.to_string()))?;
    }

    Ok(blueprint)
}

fn resolve(id_of: &BTreeMap<u64, EntityId>, export_index: u64) -> Result<EntityId, CodecError> {
    id_of.get(&export_index).copied().ok_or_else(|| {
        CodecError::invalid(format!("reference to missing entity_number {export_index}"))
    })
}

/// `neighbours` 在线上不带类型，按两端的目录族还原：两端都是
/// 传送带族 ⇒ 传送带边；两端都有流体接口 ⇒ 流体边；其余忽略。
fn untyped_link_kind(blueprint: &Blueprint, a: EntityId, b: EntityId) -> Option<LinkKind> {
    let catalog = Catalog::builtin();
    let entry_a = catalog.lookup(&blueprint.entity(a)?.kind)?;
    let entry_b = catalog.lookup(&blueprint.entity(b)?.kind)?;
    if entry_a.is_belt() && entry_b.is_belt() {
        Some(LinkKind::Transport)
    } else if entry_a.has_fluid_ports() && entry_b.has_fluid_ports() {
        Some(LinkKind::Fluid)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// 编码
// ---------------------------------------------------------------------------

fn export_blueprint(blueprint: &Blueprint) -> WireBlueprint {
    let catalog = Catalog::builtin();

    // 内部标识 → 1 起的导出序号，按插入顺序
    let mut index_of: BTreeMap<u64, u64> = BTreeMap::new();
    for (slot, (id, _)) in blueprint.entities().enumerate() {
        index_of.insert(id.get(), slot as u64 + 1);
    }

    let entities = blueprint
        .entities()
        .map(|(id, entity)| {
            let mut red = Vec::new();
            let mut green = Vec::new();
            let mut neighbours = Vec::new();
            for Link { target, kind } in blueprint.neighbors(*id) {
                let target_index = index_of[&target.get()];
                match kind {
                    LinkKind::Signal(WireColor::Red) => red.push(WireConnRef {
                        entity_id: target_index,
                    }),
                    LinkKind::Signal(WireColor::Green) => green.push(WireConnRef {
                        entity_id: target_index,
                    }),
                    LinkKind::Transport | LinkKind::Fluid => neighbours.push(target_index),
                }
            }
            red.sort_by_key(|conn| conn.entity_id);
            green.sort_by_key(|conn| conn.entity_id);
            neighbours.sort_unstable();

            let connections = (!red.is_empty() || !green.is_empty()).then(|| {
                BTreeMap::from([("1".to_string(), WireConnectionPoint { red, green })])
            });

            WireEntity {
                entity_number: index_of[&id.get()],
                name: entity.kind.clone(),
                position: WirePosition {
                    x: entity.position.x(),
                    y: entity.position.y(),
                },
                direction: (entity.direction.raw() != 0).then(|| entity.direction.raw()),
                direction_type: entity
                    .direction_type
                    .map(|direction_type| direction_type.as_wire().to_string()),
                connections,
                neighbours,
                properties: entity.properties.clone(),
            }
        })
        .collect();

    let tiles = blueprint
        .tiles()
        .iter()
        .map(|tile| WireTile {
            name: tile.kind.clone(),
            position: WirePosition {
                x: tile.cell.x as f64,
                y: tile.cell.y as f64,
            },
        })
        .collect();

    let icons = blueprint
        .icons()
        .iter()
        .enumerate()
        .map(|(slot, name)| WireIcon {
            index: slot as u32 + 1,
            signal: WireSignal {
                name: name.clone(),
                kind: match catalog.lookup(name).map(|entry| entry.category) {
                    Some(Category::Tile) => "tile".to_string(),
                    _ => "item".to_string(),
                },
            },
        })
        .collect();

    WireBlueprint {
        item: "blueprint".to_string(),
        label: Some(blueprint.label().to_string()).filter(|label| !label.is_empty()),
        description: Some(blueprint.description().to_string())
            .filter(|description| !description.is_empty()),
        icons,
        entities,
        tiles,
        version: WIRE_VERSION,
    }
}
