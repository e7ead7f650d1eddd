pub mod conduit;
pub mod history;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use std::collections::HashSet;

use fbe_config::{EditorConfig, LayoutConfig};
use fbe_core::catalog::Catalog;
use fbe_core::document::{Blueprint, DocumentError, Entity, EntityId, LinkKind};
use fbe_core::grid::{Cell, Direction, Offset, Position};

use crate::conduit::{ConduitPlan, Extractor};
use crate::history::{EditOp, History};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

/// 一份蓝图的编辑会话：文档加上它的撤销历史。每份被编辑的蓝图
/// 各持有一个会话，没有任何进程级全局状态；全部操作同步完成。
#[derive(Debug)]
pub struct Session {
    blueprint: Blueprint,
    history: History,
    layout_budget: usize,
}

impl Session {
    pub fn new(blueprint: Blueprint) -> Self {
        Self {
            blueprint,
            history: History::new(),
            layout_budget: LayoutConfig::default().search_budget,
        }
    }

    /// 历史容量与布线搜索预算取自配置。
    pub fn with_config(blueprint: Blueprint, config: &EditorConfig) -> Self {
        Self {
            blueprint,
            history: History::with_capacity_limit(config.history.max_entries),
            layout_budget: config.layout.search_budget,
        }
    }

    #[inline]
    pub fn document(&self) -> &Blueprint {
        &self.blueprint
    }

    #[inline]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// 结束会话，交回文档。
    pub fn into_document(self) -> Blueprint {
        self.blueprint
    }

    /// 执行一个可逆操作并记录历史。
    pub fn apply(&mut self, op: EditOp) -> Result<Option<EntityId>, EngineError> {
        let created = self.history.apply(&mut self.blueprint, op)?;
        Ok(created)
    }

    pub fn add_entity(
        &mut self,
        kind: &str,
        position: Position,
        direction: Direction,
    ) -> Result<EntityId, EngineError> {
        let id = self
            .apply(EditOp::AddEntity {
                kind: kind.to_string(),
                position,
                direction,
            })?
            .ok_or(DocumentError::UnknownKind(kind.to_string()))?;
        debug!(kind, id = id.get(), "已放置实体");
        Ok(id)
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Result<(), EngineError> {
        self.apply(EditOp::RemoveEntity { id })?;
        debug!(id = id.get(), "已移除实体");
        Ok(())
    }

    pub fn move_entity(&mut self, id: EntityId, offset: Offset) -> Result<(), EngineError> {
        self.apply(EditOp::MoveEntity { id, offset })?;
        Ok(())
    }

    pub fn rotate_entity(&mut self, id: EntityId, direction: Direction) -> Result<(), EngineError> {
        self.apply(EditOp::RotateEntity { id, direction })?;
        Ok(())
    }

    pub fn set_property(
        &mut self,
        id: EntityId,
        key: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        self.apply(EditOp::SetProperty {
            id,
            key: key.to_string(),
            value,
        })?;
        Ok(())
    }

    /// 把同族实体的设置整体复制过去，逐键记录历史。跨族拒绝。
    pub fn paste_settings(&mut self, from: EntityId, to: EntityId) -> Result<(), EngineError> {
        if !self.blueprint.can_link_settings(from, to) {
            return Err(DocumentError::LinkRejected {
                a: from.get(),
                b: to.get(),
                reason: "settings paste requires the same kind family".to_string(),
            }
            .into());
        }
        let source: Entity = self
            .blueprint
            .entity(from)
            .cloned()
            .ok_or(DocumentError::UnknownEntity(from.get()))?;
        for (key, value) in source.properties {
            self.apply(EditOp::SetProperty {
                id: to,
                key,
                value,
            })?;
        }
        debug!(from = from.get(), to = to.get(), "已复制实体设置");
        Ok(())
    }

    pub fn link(&mut self, a: EntityId, b: EntityId, kind: LinkKind) -> Result<(), EngineError> {
        self.apply(EditOp::Link { a, b, kind })?;
        Ok(())
    }

    pub fn unlink(&mut self, a: EntityId, b: EntityId, kind: LinkKind) -> Result<(), EngineError> {
        self.apply(EditOp::Unlink { a, b, kind })?;
        Ok(())
    }

    pub fn set_tile(&mut self, cell: Cell, kind: &str) -> Result<(), EngineError> {
        self.apply(EditOp::SetTile {
            cell,
            kind: kind.to_string(),
        })?;
        Ok(())
    }

    pub fn remove_tile(&mut self, cell: Cell) -> Result<(), EngineError> {
        self.apply(EditOp::RemoveTile { cell })?;
        Ok(())
    }

    pub fn undo(&mut self) -> Result<bool, EngineError> {
        let undone = self.history.undo(&mut self.blueprint)?;
        if undone {
            debug!("已撤销一步");
        }
        Ok(undone)
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        let redone = self.history.redo(&mut self.blueprint)?;
        if redone {
            debug!("已重做一步");
        }
        Ok(redone)
    }

    /// 以当前文档的占地为障碍做布线规划，搜索预算取会话配置。
    pub fn plan_conduits(&self, extractors: &[Extractor]) -> ConduitPlan {
        let catalog = Catalog::builtin();
        let mut blocked = HashSet::new();
        for (_, entity) in self.blueprint.entities() {
            if let Some(entry) = catalog.lookup(&entity.kind) {
                blocked.extend(entity.occupied_cells(entry));
            }
        }
        conduit::plan_conduits(extractors, &blocked, self.layout_budget)
    }

    /// 把布线结果落到文档里。每格各记一条历史，整个管网可以逐步
    /// 撤销；已被占用的格子跳过。返回新建实体的标识。
    pub fn apply_conduit_plan(
        &mut self,
        plan: &ConduitPlan,
        kind: &str,
    ) -> Result<Vec<EntityId>, EngineError> {
        let mut created = Vec::with_capacity(plan.conduits.len());
        for cell in &plan.conduits {
            if self.blueprint.entity_at(*cell).is_some() {
                debug!(x = cell.x, y = cell.y, "格子已被占用，跳过布管");
                continue;
            }
            created.push(self.add_entity(kind, cell.center(), Direction::North)?);
        }
        debug!(count = created.len(), kind, "已铺设管网");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::{Extractor, plan_conduits};
    use std::collections::HashSet;

    #[test]
    fn session_edits_are_undoable() {
        let mut session = Session::new(Blueprint::new("test"));
        let belt = session
            .add_entity("transport-belt", Position::new(0.5, 0.5), Direction::East)
            .expect("belt");
        session
            .move_entity(belt, Offset::new(0.0, 1.0))
            .expect("move");

        assert!(session.undo().expect("undo move"));
        assert!(session.undo().expect("undo add"));
        assert!(session.document().is_empty());
        assert!(!session.undo().expect("stack bottom"));

        assert!(session.redo().expect("redo add"));
        assert!(session.document().entity(belt).is_some());
    }

    #[test]
    fn with_config_applies_history_limit() {
        let config = EditorConfig::default();
        let mut session = Session::with_config(Blueprint::new("test"), &config);
        session
            .add_entity("pipe", Position::new(0.5, 0.5), Direction::North)
            .expect("pipe");
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn paste_settings_rejects_cross_family() {
        let mut session = Session::new(Blueprint::new("test"));
        let assembler = session
            .add_entity(
                "assembling-machine-1",
                Position::new(1.5, 1.5),
                Direction::North,
            )
            .expect("assembler");
        let belt = session
            .add_entity("transport-belt", Position::new(5.5, 0.5), Direction::East)
            .expect("belt");
        assert!(session.paste_settings(assembler, belt).is_err());

        let other = session
            .add_entity(
                "assembling-machine-2",
                Position::new(8.5, 1.5),
                Direction::North,
            )
            .expect("assembler");
        session
            .set_property(assembler, "recipe", serde_json::json!("iron-gear-wheel"))
            .expect("recipe");
        session.paste_settings(assembler, other).expect("paste");
        assert_eq!(
            session
                .document()
                .entity(other)
                .and_then(|entity| entity.properties.get("recipe")),
            Some(&serde_json::json!("iron-gear-wheel"))
        );
    }

    #[test]
    fn session_planning_respects_configured_budget() {
        let mut config = EditorConfig::default();
        config.layout.search_budget = 4;
        let session = Session::with_config(Blueprint::new("test"), &config);
        let extractors = [
            Extractor {
                id: EntityId::new(1),
                output: Cell::new(0, 0),
            },
            Extractor {
                id: EntityId::new(2),
                output: Cell::new(50, 0),
            },
        ];

        let plan = session.plan_conduits(&extractors);
        assert_eq!(plan.connected, vec![EntityId::new(1)]);
        assert_eq!(plan.unconnected, vec![EntityId::new(2)]);

        // 默认预算下同一布局可以完整连通
        let roomy = Session::new(Blueprint::new("test"));
        assert!(roomy.plan_conduits(&extractors).is_complete());
    }

    #[test]
    fn session_planning_treats_placed_entities_as_blocked() {
        let mut session = Session::new(Blueprint::new("test"));
        // 把 (10,10) 四面围死
        for (x, y) in [(9.5, 10.5), (11.5, 10.5), (10.5, 9.5), (10.5, 11.5)] {
            session
                .add_entity("stone-wall", Position::new(x, y), Direction::North)
                .expect("wall");
        }
        let extractors = [
            Extractor {
                id: EntityId::new(1),
                output: Cell::new(0, 0),
            },
            Extractor {
                id: EntityId::new(2),
                output: Cell::new(10, 10),
            },
        ];

        let plan = session.plan_conduits(&extractors);
        assert_eq!(plan.connected, vec![EntityId::new(1)]);
        assert_eq!(plan.unconnected, vec![EntityId::new(2)]);
        assert!(plan.note.is_some());
    }

    #[test]
    fn conduit_plan_is_applied_and_undone_stepwise() {
        let mut session = Session::new(Blueprint::new("test"));
        let extractors = [
            Extractor {
                id: EntityId::new(100),
                output: Cell::new(0, 0),
            },
            Extractor {
                id: EntityId::new(101),
                output: Cell::new(4, 0),
            },
        ];
        let plan = plan_conduits(&extractors, &HashSet::new(), 10_000);
        assert!(plan.is_complete());

        let created = session.apply_conduit_plan(&plan, "pipe").expect("apply");
        assert_eq!(created.len(), plan.conduits.len());
        assert_eq!(session.document().entity_count(), created.len());

        while session.undo().expect("undo") {}
        assert!(session.document().is_empty());
    }
}
