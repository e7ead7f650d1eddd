use std::collections::{HashMap, HashSet, VecDeque};

use fbe_core::document::EntityId;
use fbe_core::grid::Cell;

/// 待接入的采掘设备：实体标识加上它的输出格。
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    pub id: EntityId,
    pub output: Cell,
}

/// 布线结果。部分连通也是可用结果，不是失败。
#[derive(Debug, Clone)]
pub struct ConduitPlan {
    /// 需要铺设管道的格子，按发现顺序排列，整体构成一棵连通树。
    pub conduits: Vec<Cell>,
    pub connected: Vec<EntityId>,
    pub unconnected: Vec<EntityId>,
    pub note: Option<String>,
}

impl ConduitPlan {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.unconnected.is_empty()
    }
}

/// 规划一张把所有输出格连成一棵树的管网。
///
/// 第一个可达输出作为连通域的种子，然后反复从整个连通域出发做
/// 多源 BFS，找到最近的未接入输出，把找到的路径并入连通域。搜索
/// 预算以出队次数计，耗尽或可达空间用完时剩余输出记为未接入。
pub fn plan_conduits(
    extractors: &[Extractor],
    blocked: &HashSet<Cell>,
    search_budget: usize,
) -> ConduitPlan {
    let mut connected = Vec::new();
    let mut unconnected = Vec::new();
    let mut pending: Vec<Extractor> = Vec::new();
    for extractor in extractors {
        if blocked.contains(&extractor.output) {
            unconnected.push(extractor.id);
        } else {
            pending.push(*extractor);
        }
    }

    let mut conduits = Vec::new();
    // region 以插入顺序保存，BFS 的种子顺序因此是确定的
    let mut region: Vec<Cell> = Vec::new();
    let mut region_set: HashSet<Cell> = HashSet::new();
    if !pending.is_empty() {
        let seed = pending.remove(0);
        region.push(seed.output);
        region_set.insert(seed.output);
        conduits.push(seed.output);
        connected.push(seed.id);
    }

    let mut budget = search_budget;
    while !pending.is_empty() {
        // 上一条路径可能顺路穿过了别的输出格
        let mut slot = 0;
        while slot < pending.len() {
            if region_set.contains(&pending[slot].output) {
                connected.push(pending.remove(slot).id);
            } else {
                slot += 1;
            }
        }
        if pending.is_empty() {
            break;
        }

        let Some(path) = grow_to_nearest(&region, &region_set, &pending, blocked, &mut budget)
        else {
            break;
        };
        // path 从连通域边上一格走到某个输出格
        let Some(&reached) = path.last() else {
            break;
        };
        for cell in path {
            if region_set.insert(cell) {
                region.push(cell);
                conduits.push(cell);
            }
        }
        let Some(slot) = pending
            .iter()
            .position(|extractor| extractor.output == reached)
        else {
            break;
        };
        connected.push(pending.remove(slot).id);
    }

    for extractor in pending {
        unconnected.push(extractor.id);
    }
    let note = (!unconnected.is_empty())
        .then(|| format!("{} outpost(s) could not be connected", unconnected.len()));

    ConduitPlan {
        conduits,
        connected,
        unconnected,
        note,
    }
}

/// 从连通域做一轮多源 BFS，返回到最近未接入输出的路径（不含已在
/// 连通域里的起点格）。预算耗尽或无路可走时返回 None。
fn grow_to_nearest(
    region: &[Cell],
    region_set: &HashSet<Cell>,
    pending: &[Extractor],
    blocked: &HashSet<Cell>,
    budget: &mut usize,
) -> Option<Vec<Cell>> {
    let targets: HashSet<Cell> = pending.iter().map(|extractor| extractor.output).collect();
    let mut queue: VecDeque<Cell> = VecDeque::new();
    let mut parent: HashMap<Cell, Cell> = HashMap::new();
    let mut seen: HashSet<Cell> = region_set.clone();
    for cell in region {
        queue.push_back(*cell);
    }

    while let Some(cell) = queue.pop_front() {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;

        if targets.contains(&cell) && !region_set.contains(&cell) {
            let mut path = vec![cell];
            let mut cursor = cell;
            while let Some(previous) = parent.get(&cursor) {
                if region_set.contains(previous) {
                    break;
                }
                path.push(*previous);
                cursor = *previous;
            }
            path.reverse();
            return Some(path);
        }

        for next in cell.neighbors4() {
            if blocked.contains(&next) || !seen.insert(next) {
                continue;
            }
            parent.insert(next, cell);
            queue.push_back(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(raw: u64, x: i32, y: i32) -> Extractor {
        Extractor {
            id: EntityId::new(raw),
            output: Cell::new(x, y),
        }
    }

    /// 平面上的连通性检查：管网格子必须构成一个 4 邻接连通块。
    fn cells_are_connected(cells: &[Cell]) -> bool {
        let Some(first) = cells.first() else {
            return true;
        };
        let all: HashSet<Cell> = cells.iter().copied().collect();
        let mut seen = HashSet::from([*first]);
        let mut queue = VecDeque::from([*first]);
        while let Some(cell) = queue.pop_front() {
            for next in cell.neighbors4() {
                if all.contains(&next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.len() == all.len()
    }

    #[test]
    fn three_open_extractors_are_fully_connected() {
        let extractors = [
            extractor(1, 0, 0),
            extractor(2, 6, 0),
            extractor(3, 3, 5),
        ];
        let plan = plan_conduits(&extractors, &HashSet::new(), 10_000);
        assert!(plan.is_complete());
        assert_eq!(plan.connected.len(), 3);
        assert!(plan.note.is_none());
        assert!(cells_are_connected(&plan.conduits));
        for e in &extractors {
            assert!(plan.conduits.contains(&e.output));
        }
    }

    #[test]
    fn walled_off_extractor_is_reported_unconnected() {
        let extractors = [
            extractor(1, 0, 0),
            extractor(2, 4, 0),
            extractor(3, 10, 10),
        ];
        // 把 (10,10) 围死
        let blocked: HashSet<Cell> = [
            Cell::new(9, 10),
            Cell::new(11, 10),
            Cell::new(10, 9),
            Cell::new(10, 11),
        ]
        .into_iter()
        .collect();
        let plan = plan_conduits(&extractors, &blocked, 10_000);
        assert_eq!(plan.connected.len(), 2);
        assert_eq!(plan.unconnected, vec![EntityId::new(3)]);
        assert_eq!(
            plan.note.as_deref(),
            Some("1 outpost(s) could not be connected")
        );
        assert!(cells_are_connected(&plan.conduits));
    }

    #[test]
    fn blocked_output_cell_is_unconnected_up_front() {
        let extractors = [extractor(1, 0, 0), extractor(2, 3, 0)];
        let blocked: HashSet<Cell> = [Cell::new(3, 0)].into_iter().collect();
        let plan = plan_conduits(&extractors, &blocked, 10_000);
        assert_eq!(plan.connected, vec![EntityId::new(1)]);
        assert_eq!(plan.unconnected, vec![EntityId::new(2)]);
    }

    #[test]
    fn exhausted_budget_yields_partial_plan() {
        let extractors = [extractor(1, 0, 0), extractor(2, 50, 0)];
        let plan = plan_conduits(&extractors, &HashSet::new(), 4);
        assert_eq!(plan.connected, vec![EntityId::new(1)]);
        assert_eq!(plan.unconnected, vec![EntityId::new(2)]);
        assert!(plan.note.is_some());
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        let plan = plan_conduits(&[], &HashSet::new(), 100);
        assert!(plan.is_complete());
        assert!(plan.conduits.is_empty());
        assert!(plan.connected.is_empty());
        assert!(plan.note.is_none());
    }
}
