use serde_json::Value;

use fbe_core::document::{
    Blueprint, DocumentError, Entity, EntityId, Link, LinkKind,
};
use fbe_core::grid::{Cell, Direction, Offset, Position};

/// 编辑会话暴露的可逆操作词汇表。
#[derive(Debug, Clone)]
pub enum EditOp {
    AddEntity {
        kind: String,
        position: Position,
        direction: Direction,
    },
    RemoveEntity {
        id: EntityId,
    },
    MoveEntity {
        id: EntityId,
        offset: Offset,
    },
    RotateEntity {
        id: EntityId,
        direction: Direction,
    },
    SetProperty {
        id: EntityId,
        key: String,
        value: Value,
    },
    Link {
        a: EntityId,
        b: EntityId,
        kind: LinkKind,
    },
    Unlink {
        a: EntityId,
        b: EntityId,
        kind: LinkKind,
    },
    SetTile {
        cell: Cell,
        kind: String,
    },
    RemoveTile {
        cell: Cell,
    },
}

/// 历史栈里重放用的具体变更。与 [`EditOp`] 不同，这里的每一项都
/// 携带执行时捕获的完整数据（比如被删实体的整条记录），因此正反
/// 方向都能原样重放。
#[derive(Debug, Clone)]
enum Mutation {
    Insert { id: EntityId, entity: Box<Entity> },
    Remove { id: EntityId },
    Translate { id: EntityId, offset: Offset },
    Orient { id: EntityId, direction: Direction },
    PutProperty { id: EntityId, key: String, value: Value },
    Link { a: EntityId, b: EntityId, kind: LinkKind },
    Unlink { a: EntityId, b: EntityId, kind: LinkKind },
    PutTile { cell: Cell, kind: Option<String> },
}

impl Mutation {
    fn run(&self, blueprint: &mut Blueprint) -> Result<(), DocumentError> {
        match self {
            Mutation::Insert { id, entity } => blueprint.insert_entity(*id, (**entity).clone()),
            Mutation::Remove { id } => blueprint.remove_entity(*id).map(|_| ()),
            Mutation::Translate { id, offset } => blueprint.move_entity(*id, *offset),
            Mutation::Orient { id, direction } => blueprint.rotate_entity(*id, *direction),
            Mutation::PutProperty { id, key, value } => blueprint
                .set_property(*id, key, value.clone())
                .map(|_| ()),
            Mutation::Link { a, b, kind } => blueprint.link(*a, *b, *kind),
            Mutation::Unlink { a, b, kind } => blueprint.unlink(*a, *b, *kind),
            Mutation::PutTile { cell, kind } => match kind {
                Some(kind) => blueprint.set_tile(*cell, kind).map(|_| ()),
                None => {
                    blueprint.remove_tile(*cell);
                    Ok(())
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    redo: Mutation,
    undo: Mutation,
}

/// 线性撤销栈。游标之前的条目已生效，之后的是可重做的尾巴；
/// 新变更截断尾巴。容量上限溢出时丢弃最老的条目。
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: usize,
    max_entries: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_entries` 为 0 表示不限容量。
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// 执行一个操作并在此刻推导它的逆（删除要捕获完整实体记录，
    /// 写属性要捕获旧值）。操作失败时历史不变。
    pub fn apply(
        &mut self,
        blueprint: &mut Blueprint,
        op: EditOp,
    ) -> Result<Option<EntityId>, DocumentError> {
        let mut created = None;
        let entry = match op {
            EditOp::AddEntity {
                kind,
                position,
                direction,
            } => {
                let id = blueprint.add_entity(&kind, position, direction)?;
                created = Some(id);
                let snapshot = blueprint
                    .entity(id)
                    .cloned()
                    .ok_or(DocumentError::UnknownEntity(id.get()))?;
                Some(HistoryEntry {
                    // 重做时以同一标识重新插入，引用保持稳定
                    redo: Mutation::Insert {
                        id,
                        entity: Box::new(snapshot),
                    },
                    undo: Mutation::Remove { id },
                })
            }
            EditOp::RemoveEntity { id } => {
                let record = blueprint.remove_entity(id)?;
                Some(HistoryEntry {
                    redo: Mutation::Remove { id },
                    undo: Mutation::Insert {
                        id,
                        entity: Box::new(record),
                    },
                })
            }
            EditOp::MoveEntity { id, offset } => {
                blueprint.move_entity(id, offset)?;
                (!offset.is_zero()).then_some(HistoryEntry {
                    redo: Mutation::Translate { id, offset },
                    undo: Mutation::Translate {
                        id,
                        offset: offset.reversed(),
                    },
                })
            }
            EditOp::RotateEntity { id, direction } => {
                let previous = blueprint
                    .entity(id)
                    .ok_or(DocumentError::UnknownEntity(id.get()))?
                    .direction;
                blueprint.rotate_entity(id, direction)?;
                (previous != direction).then_some(HistoryEntry {
                    redo: Mutation::Orient { id, direction },
                    undo: Mutation::Orient {
                        id,
                        direction: previous,
                    },
                })
            }
            EditOp::SetProperty { id, key, value } => {
                let previous = blueprint.set_property(id, &key, value.clone())?;
                Some(HistoryEntry {
                    redo: Mutation::PutProperty {
                        id,
                        key: key.clone(),
                        value,
                    },
                    undo: Mutation::PutProperty {
                        id,
                        key,
                        value: previous.unwrap_or(Value::Null),
                    },
                })
            }
            EditOp::Link { a, b, kind } => {
                let exists = blueprint
                    .neighbors(a)
                    .contains(&Link { target: b, kind });
                blueprint.link(a, b, kind)?;
                // 已存在的边重复连接是幂等的，不产生历史条目
                (!exists).then_some(HistoryEntry {
                    redo: Mutation::Link { a, b, kind },
                    undo: Mutation::Unlink { a, b, kind },
                })
            }
            EditOp::Unlink { a, b, kind } => {
                let existed = blueprint
                    .neighbors(a)
                    .contains(&Link { target: b, kind });
                blueprint.unlink(a, b, kind)?;
                existed.then_some(HistoryEntry {
                    redo: Mutation::Unlink { a, b, kind },
                    undo: Mutation::Link { a, b, kind },
                })
            }
            EditOp::SetTile { cell, kind } => {
                let replaced = blueprint.set_tile(cell, &kind)?;
                Some(HistoryEntry {
                    redo: Mutation::PutTile {
                        cell,
                        kind: Some(kind),
                    },
                    undo: Mutation::PutTile {
                        cell,
                        kind: replaced.map(|tile| tile.kind),
                    },
                })
            }
            EditOp::RemoveTile { cell } => {
                blueprint.remove_tile(cell).map(|removed| HistoryEntry {
                    redo: Mutation::PutTile { cell, kind: None },
                    undo: Mutation::PutTile {
                        cell,
                        kind: Some(removed.kind),
                    },
                })
            }
        };

        if let Some(entry) = entry {
            self.entries.truncate(self.cursor);
            self.entries.push(entry);
            self.cursor += 1;
            if self.max_entries > 0 && self.entries.len() > self.max_entries {
                self.entries.remove(0);
                self.cursor -= 1;
            }
        }
        Ok(created)
    }

    /// 撤销一步。栈底返回 `Ok(false)`，不是错误。
    pub fn undo(&mut self, blueprint: &mut Blueprint) -> Result<bool, DocumentError> {
        if self.cursor == 0 {
            return Ok(false);
        }
        self.entries[self.cursor - 1].undo.run(blueprint)?;
        self.cursor -= 1;
        Ok(true)
    }

    /// 重做一步。栈顶返回 `Ok(false)`。
    pub fn redo(&mut self, blueprint: &mut Blueprint) -> Result<bool, DocumentError> {
        if self.cursor == self.entries.len() {
            return Ok(false);
        }
        self.entries[self.cursor].redo.run(blueprint)?;
        self.cursor += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbe_core::document::WireColor;
    use serde_json::json;

    fn add_belt(history: &mut History, blueprint: &mut Blueprint, x: f64) -> EntityId {
        history
            .apply(
                blueprint,
                EditOp::AddEntity {
                    kind: "transport-belt".to_string(),
                    position: Position::new(x, 0.5),
                    direction: Direction::East,
                },
            )
            .expect("add belt")
            .expect("id")
    }

    #[test]
    fn undo_restores_initial_state_after_many_ops() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();

        let belt = add_belt(&mut history, &mut blueprint, 0.5);
        history
            .apply(
                &mut blueprint,
                EditOp::MoveEntity {
                    id: belt,
                    offset: Offset::new(0.0, 2.0),
                },
            )
            .expect("move");
        history
            .apply(
                &mut blueprint,
                EditOp::RotateEntity {
                    id: belt,
                    direction: Direction::South,
                },
            )
            .expect("rotate");
        history
            .apply(
                &mut blueprint,
                EditOp::SetTile {
                    cell: Cell::new(5, 5),
                    kind: "concrete".to_string(),
                },
            )
            .expect("tile");

        while history.undo(&mut blueprint).expect("undo") {}
        assert!(blueprint.is_empty());
        assert!(!history.can_undo());
        // 栈底的再一次撤销是空操作
        assert!(!history.undo(&mut blueprint).expect("undo at bottom"));
    }

    #[test]
    fn redo_reinserts_entity_under_the_same_id() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();
        let belt = add_belt(&mut history, &mut blueprint, 0.5);

        assert!(history.undo(&mut blueprint).expect("undo"));
        assert!(blueprint.entity(belt).is_none());
        assert!(history.redo(&mut blueprint).expect("redo"));
        assert!(blueprint.entity(belt).is_some());
        assert!(!history.redo(&mut blueprint).expect("redo at top"));
    }

    #[test]
    fn remove_undo_restores_record_and_links() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();
        let a = history
            .apply(
                &mut blueprint,
                EditOp::AddEntity {
                    kind: "medium-electric-pole".to_string(),
                    position: Position::new(0.5, 0.5),
                    direction: Direction::North,
                },
            )
            .expect("pole a")
            .expect("id");
        let b = history
            .apply(
                &mut blueprint,
                EditOp::AddEntity {
                    kind: "medium-electric-pole".to_string(),
                    position: Position::new(4.5, 0.5),
                    direction: Direction::North,
                },
            )
            .expect("pole b")
            .expect("id");
        history
            .apply(
                &mut blueprint,
                EditOp::Link {
                    a,
                    b,
                    kind: LinkKind::Signal(WireColor::Red),
                },
            )
            .expect("link");

        history
            .apply(&mut blueprint, EditOp::RemoveEntity { id: a })
            .expect("remove");
        assert!(blueprint.neighbors(b).is_empty());

        assert!(history.undo(&mut blueprint).expect("undo remove"));
        assert_eq!(blueprint.neighbors(a).len(), 1);
        assert_eq!(blueprint.neighbors(b).len(), 1);
    }

    #[test]
    fn new_mutation_discards_redo_tail() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();
        add_belt(&mut history, &mut blueprint, 0.5);
        add_belt(&mut history, &mut blueprint, 1.5);

        assert!(history.undo(&mut blueprint).expect("undo"));
        assert!(history.can_redo());
        add_belt(&mut history, &mut blueprint, 3.5);
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn set_property_undo_restores_previous_value() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();
        let assembler = history
            .apply(
                &mut blueprint,
                EditOp::AddEntity {
                    kind: "assembling-machine-1".to_string(),
                    position: Position::new(1.5, 1.5),
                    direction: Direction::North,
                },
            )
            .expect("assembler")
            .expect("id");

        history
            .apply(
                &mut blueprint,
                EditOp::SetProperty {
                    id: assembler,
                    key: "recipe".to_string(),
                    value: json!("iron-gear-wheel"),
                },
            )
            .expect("first value");
        history
            .apply(
                &mut blueprint,
                EditOp::SetProperty {
                    id: assembler,
                    key: "recipe".to_string(),
                    value: json!("electronic-circuit"),
                },
            )
            .expect("second value");

        history.undo(&mut blueprint).expect("undo");
        let entity = blueprint.entity(assembler).expect("record");
        assert_eq!(entity.properties.get("recipe"), Some(&json!("iron-gear-wheel")));

        history.undo(&mut blueprint).expect("undo");
        let entity = blueprint.entity(assembler).expect("record");
        assert!(entity.properties.get("recipe").is_none());
    }

    #[test]
    fn capacity_limit_drops_oldest_entries() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::with_capacity_limit(2);
        add_belt(&mut history, &mut blueprint, 0.5);
        add_belt(&mut history, &mut blueprint, 1.5);
        add_belt(&mut history, &mut blueprint, 2.5);
        assert_eq!(history.len(), 2);

        while history.undo(&mut blueprint).expect("undo") {}
        // 最老的一步已被丢弃，第一条传送带留在文档里
        assert_eq!(blueprint.entity_count(), 1);
    }

    #[test]
    fn failed_op_leaves_history_untouched() {
        let mut blueprint = Blueprint::new("test");
        let mut history = History::new();
        add_belt(&mut history, &mut blueprint, 0.5);

        let err = history.apply(
            &mut blueprint,
            EditOp::AddEntity {
                kind: "transport-belt".to_string(),
                position: Position::new(0.5, 0.5),
                direction: Direction::East,
            },
        );
        assert!(err.is_err());
        assert_eq!(history.len(), 1);
        assert!(!history.can_redo());
    }
}
