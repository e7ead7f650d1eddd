pub mod grid {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 实体中心的世界坐标，内部以 `glam::DVec2` 表示。奇数尺寸的实体
    /// 中心落在格心（整数 + 0.5），偶数尺寸落在格点。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Position(pub DVec2);

    impl Position {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Offset) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn distance(self, other: Position) -> f64 {
            self.0.distance(other.0)
        }

        /// 坐标所在的格子。
        #[inline]
        pub fn cell(self) -> Cell {
            Cell::new(self.0.x.floor() as i32, self.0.y.floor() as i32)
        }
    }

    /// 平移向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Offset(pub DVec2);

    impl Offset {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn is_zero(self) -> bool {
            self.0 == DVec2::ZERO
        }

        #[inline]
        pub fn reversed(self) -> Self {
            Self(-self.0)
        }
    }

    /// 单个网格格子。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Cell {
        pub x: i32,
        pub y: i32,
    }

    impl Cell {
        #[inline]
        pub fn new(x: i32, y: i32) -> Self {
            Self { x, y }
        }

        #[inline]
        pub fn offset(self, dx: i32, dy: i32) -> Self {
            Self::new(self.x + dx, self.y + dy)
        }

        #[inline]
        pub fn step(self, direction: Direction) -> Self {
            let (dx, dy) = direction.offset();
            self.offset(dx, dy)
        }

        /// 四邻域，顺序固定为北、东、南、西，保证遍历结果可复现。
        #[inline]
        pub fn neighbors4(self) -> [Cell; 4] {
            [
                self.offset(0, -1),
                self.offset(1, 0),
                self.offset(0, 1),
                self.offset(-1, 0),
            ]
        }

        /// 格子中心的世界坐标。
        #[inline]
        pub fn center(self) -> Position {
            Position::new(self.x as f64 + 0.5, self.y as f64 + 0.5)
        }
    }

    /// 八方向。线格式使用 0-7 编码，偶数为正方向，北为 0，顺时针递增。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Direction {
        North = 0,
        NorthEast = 1,
        East = 2,
        SouthEast = 3,
        South = 4,
        SouthWest = 5,
        West = 6,
        NorthWest = 7,
    }

    impl Direction {
        pub fn from_raw(raw: u8) -> Option<Self> {
            match raw {
                0 => Some(Direction::North),
                1 => Some(Direction::NorthEast),
                2 => Some(Direction::East),
                3 => Some(Direction::SouthEast),
                4 => Some(Direction::South),
                5 => Some(Direction::SouthWest),
                6 => Some(Direction::West),
                7 => Some(Direction::NorthWest),
                _ => None,
            }
        }

        #[inline]
        pub fn raw(self) -> u8 {
            self as u8
        }

        #[inline]
        pub fn is_cardinal(self) -> bool {
            self.raw() % 2 == 0
        }

        #[inline]
        pub fn opposite(self) -> Self {
            Self::from_raw((self.raw() + 4) % 8).unwrap_or(Direction::North)
        }

        /// 顺时针旋转 90 度。
        #[inline]
        pub fn rotate_cw(self) -> Self {
            Self::from_raw((self.raw() + 2) % 8).unwrap_or(Direction::North)
        }

        /// 单位步进。斜方向返回两轴各一步。
        pub fn offset(self) -> (i32, i32) {
            match self {
                Direction::North => (0, -1),
                Direction::NorthEast => (1, -1),
                Direction::East => (1, 0),
                Direction::SouthEast => (1, 1),
                Direction::South => (0, 1),
                Direction::SouthWest => (-1, 1),
                Direction::West => (-1, 0),
                Direction::NorthWest => (-1, -1),
            }
        }
    }

    impl Default for Direction {
        fn default() -> Self {
            Direction::North
        }
    }

    /// 整格对齐的轴对齐包围盒。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Bounds {
        min: Cell,
        max: Cell,
    }

    impl Bounds {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Cell::new(i32::MAX, i32::MAX),
                max: Cell::new(i32::MIN, i32::MIN),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x > self.max.x || self.min.y > self.max.y
        }

        #[inline]
        pub fn min(&self) -> Cell {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Cell {
            self.max
        }

        pub fn include_cell(&mut self, cell: Cell) {
            if self.is_empty() {
                self.min = cell;
                self.max = cell;
                return;
            }
            self.min = Cell::new(self.min.x.min(cell.x), self.min.y.min(cell.y));
            self.max = Cell::new(self.max.x.max(cell.x), self.max.y.max(cell.y));
        }

        pub fn include_bounds(&mut self, other: &Bounds) {
            if other.is_empty() {
                return;
            }
            self.include_cell(other.min);
            self.include_cell(other.max);
        }

        #[inline]
        pub fn contains(&self, cell: Cell) -> bool {
            !self.is_empty()
                && cell.x >= self.min.x
                && cell.x <= self.max.x
                && cell.y >= self.min.y
                && cell.y <= self.max.y
        }

        #[inline]
        pub fn width(&self) -> u32 {
            if self.is_empty() {
                0
            } else {
                (self.max.x - self.min.x + 1) as u32
            }
        }

        #[inline]
        pub fn height(&self) -> u32 {
            if self.is_empty() {
                0
            } else {
                (self.max.y - self.min.y + 1) as u32
            }
        }
    }

}

pub mod catalog {
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::sync::LazyLock;

    use serde_json::Value;

    use crate::grid::Direction;

    /// 条目类别：可放置实体、地面覆盖或仅用于图标的物品。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Category {
        Entity,
        Tile,
        Item,
    }

    /// 流体接口的朝向掩码，以北向姿态记录，按实体方向旋转。
    pub const PORT_NORTH: u8 = 0b0001;
    pub const PORT_EAST: u8 = 0b0010;
    pub const PORT_SOUTH: u8 = 0b0100;
    pub const PORT_WEST: u8 = 0b1000;
    pub const PORT_ALL: u8 = PORT_NORTH | PORT_EAST | PORT_SOUTH | PORT_WEST;

    /// 单个目录条目。全部字段在加载后只读。
    #[derive(Debug, Clone)]
    pub struct CatalogEntry {
        pub name: &'static str,
        pub category: Category,
        pub width: u32,
        pub height: u32,
        pub rotatable: bool,
        /// 合法方向数量：1（不可旋转）、4（正方向）或 8。
        pub direction_count: u8,
        /// 是否区分输入 / 输出（地下传送带、装卸机一类）。
        pub flow_oriented: bool,
        /// 设置粘贴的兼容族：同族之间才允许复制配置。
        pub family: &'static str,
        /// 信号线最大连线距离。
        pub wire_reach: f64,
        pub fluid_ports: u8,
        /// 允许写入属性包的键。
        pub property_keys: &'static [&'static str],
        /// 默认属性，值以 JSON 字面量记录，加载时解析。
        pub defaults: &'static [(&'static str, &'static str)],
    }

    impl CatalogEntry {
        /// 旋转后的占地尺寸。东西向时宽高互换。
        pub fn footprint(&self, direction: Direction) -> (u32, u32) {
            if self.rotatable
                && self.width != self.height
                && matches!(direction, Direction::East | Direction::West)
            {
                (self.height, self.width)
            } else {
                (self.width, self.height)
            }
        }

        pub fn supports_direction(&self, direction: Direction) -> bool {
            match self.direction_count {
                8 => true,
                4 => direction.is_cardinal(),
                _ => direction == Direction::North,
            }
        }

        #[inline]
        pub fn allows_property(&self, key: &str) -> bool {
            self.property_keys.contains(&key)
        }

        #[inline]
        pub fn has_fluid_ports(&self) -> bool {
            self.fluid_ports != 0
        }

        #[inline]
        pub fn is_belt(&self) -> bool {
            matches!(self.family, "transport-belt" | "underground-belt" | "splitter")
        }

        /// 将接口掩码按实体方向旋转。仅正方向参与旋转。
        pub fn port_mask_for(&self, direction: Direction) -> u8 {
            let steps = (direction.raw() / 2) % 4;
            let mask = self.fluid_ports;
            (((mask as u16) << steps | (mask as u16) >> (4 - steps as u16)) & 0b1111) as u8
        }

        pub fn default_properties(&self) -> BTreeMap<String, Value> {
            self.defaults
                .iter()
                .filter_map(|(key, raw)| {
                    serde_json::from_str(raw)
                        .ok()
                        .map(|value| ((*key).to_string(), value))
                })
                .collect()
        }
    }

    /// 轨道族条目。编辑器认识这些名字但不建模轨道拓扑，
    /// 解码时用于把「火车蓝图」与「模组内容」区分开。
    pub const TRAIN_KINDS: &[&str] = &[
        "locomotive",
        "cargo-wagon",
        "fluid-wagon",
        "artillery-wagon",
        "straight-rail",
        "curved-rail",
        "rail-signal",
        "rail-chain-signal",
        "train-stop",
    ];

    #[inline]
    pub fn is_train_kind(name: &str) -> bool {
        TRAIN_KINDS.contains(&name)
    }

    /// 静态目录。构造后不再变化，整表以 `LazyLock` 常驻。
    #[derive(Debug)]
    pub struct Catalog {
        entries: HashMap<&'static str, CatalogEntry>,
    }

    impl Catalog {
        pub fn builtin() -> &'static Catalog {
            &BUILTIN
        }

        #[inline]
        pub fn lookup(&self, kind: &str) -> Option<&CatalogEntry> {
            self.entries.get(kind)
        }

        pub fn footprint(&self, kind: &str, direction: Direction) -> Option<(u32, u32)> {
            self.lookup(kind).map(|entry| entry.footprint(direction))
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.entries.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }

    const DEFAULT_WIRE_REACH: f64 = 9.0;

    fn entity(name: &'static str, family: &'static str, width: u32, height: u32) -> CatalogEntry {
        CatalogEntry {
            name,
            category: Category::Entity,
            width,
            height,
            rotatable: false,
            direction_count: 1,
            flow_oriented: false,
            family,
            wire_reach: DEFAULT_WIRE_REACH,
            fluid_ports: 0,
            property_keys: &[],
            defaults: &[],
        }
    }

    fn tile(name: &'static str) -> CatalogEntry {
        CatalogEntry {
            category: Category::Tile,
            family: "tile",
            ..entity(name, "tile", 1, 1)
        }
    }

    fn item(name: &'static str) -> CatalogEntry {
        CatalogEntry {
            category: Category::Item,
            family: "item",
            ..entity(name, "item", 1, 1)
        }
    }

    fn builtin_entries() -> Vec<CatalogEntry> {
        let belt = |name| CatalogEntry {
            rotatable: true,
            direction_count: 4,
            ..entity(name, "transport-belt", 1, 1)
        };
        let underground = |name| CatalogEntry {
            rotatable: true,
            direction_count: 4,
            flow_oriented: true,
            property_keys: &["items"],
            ..entity(name, "underground-belt", 1, 1)
        };
        let splitter = |name| CatalogEntry {
            rotatable: true,
            direction_count: 4,
            property_keys: &["input_priority", "output_priority", "filter"],
            ..entity(name, "splitter", 2, 1)
        };
        let inserter = |name| CatalogEntry {
            rotatable: true,
            direction_count: 4,
            property_keys: &["filters", "override_stack_size", "control_behavior"],
            ..entity(name, "inserter", 1, 1)
        };
        let assembler = |name| CatalogEntry {
            rotatable: true,
            direction_count: 4,
            property_keys: &["recipe", "items"],
            ..entity(name, "assembling-machine", 3, 3)
        };
        let chest = |name| CatalogEntry {
            property_keys: &["bar"],
            ..entity(name, "container", 1, 1)
        };
        let pole = |name, reach| CatalogEntry {
            wire_reach: reach,
            ..entity(name, "electric-pole", 1, 1)
        };

        vec![
            belt("transport-belt"),
            belt("fast-transport-belt"),
            belt("express-transport-belt"),
            underground("underground-belt"),
            underground("fast-underground-belt"),
            underground("express-underground-belt"),
            splitter("splitter"),
            splitter("fast-splitter"),
            splitter("express-splitter"),
            inserter("burner-inserter"),
            inserter("inserter"),
            inserter("long-handed-inserter"),
            inserter("fast-inserter"),
            inserter("filter-inserter"),
            inserter("stack-inserter"),
            assembler("assembling-machine-1"),
            assembler("assembling-machine-2"),
            assembler("assembling-machine-3"),
            entity("stone-furnace", "furnace", 2, 2),
            entity("steel-furnace", "furnace", 2, 2),
            entity("electric-furnace", "furnace", 3, 3),
            CatalogEntry {
                fluid_ports: PORT_ALL,
                ..entity("pipe", "pipe", 1, 1)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                flow_oriented: true,
                fluid_ports: PORT_NORTH,
                ..entity("pipe-to-ground", "pipe", 1, 1)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_NORTH | PORT_SOUTH,
                ..entity("pump", "pipe", 1, 2)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_ALL,
                ..entity("storage-tank", "storage-tank", 3, 3)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_NORTH,
                ..entity("pumpjack", "pumpjack", 3, 3)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_SOUTH,
                ..entity("offshore-pump", "offshore-pump", 1, 1)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_NORTH | PORT_SOUTH,
                property_keys: &["recipe", "items"],
                ..entity("oil-refinery", "oil-refinery", 5, 5)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                fluid_ports: PORT_NORTH | PORT_SOUTH,
                property_keys: &["recipe", "items"],
                ..entity("chemical-plant", "chemical-plant", 3, 3)
            },
            pole("small-electric-pole", 7.5),
            pole("medium-electric-pole", 9.0),
            CatalogEntry {
                wire_reach: 30.0,
                ..entity("big-electric-pole", "electric-pole", 2, 2)
            },
            CatalogEntry {
                wire_reach: 18.0,
                ..entity("substation", "electric-pole", 2, 2)
            },
            chest("wooden-chest"),
            chest("iron-chest"),
            chest("steel-chest"),
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                property_keys: &["control_behavior"],
                ..entity("arithmetic-combinator", "combinator", 1, 2)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                property_keys: &["control_behavior"],
                ..entity("decider-combinator", "combinator", 1, 2)
            },
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                property_keys: &["control_behavior"],
                ..entity("constant-combinator", "combinator", 1, 1)
            },
            CatalogEntry {
                property_keys: &["items"],
                ..entity("beacon", "beacon", 3, 3)
            },
            entity("lab", "lab", 3, 3),
            entity("radar", "radar", 3, 3),
            entity("stone-wall", "wall", 1, 1),
            CatalogEntry {
                rotatable: true,
                direction_count: 4,
                ..entity("gate", "gate", 1, 1)
            },
            tile("stone-path"),
            tile("concrete"),
            tile("refined-concrete"),
            tile("hazard-concrete-left"),
            tile("landfill"),
            item("iron-plate"),
            item("copper-plate"),
            item("electronic-circuit"),
            item("advanced-circuit"),
            item("iron-gear-wheel"),
            item("coal"),
            item("crude-oil"),
        ]
    }

    static BUILTIN: LazyLock<Catalog> = LazyLock::new(|| {
        let mut entries = HashMap::new();
        for entry in builtin_entries() {
            entries.insert(entry.name, entry);
        }
        Catalog { entries }
    });

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn lookup_and_footprint_rotation() {
            let catalog = Catalog::builtin();
            assert!(catalog.lookup("transport-belt").is_some());
            assert!(catalog.lookup("not-a-real-thing").is_none());

            // splitter 是 2x1，东西向时互换
            assert_eq!(
                catalog.footprint("splitter", Direction::North),
                Some((2, 1))
            );
            assert_eq!(catalog.footprint("splitter", Direction::East), Some((1, 2)));
            assert_eq!(
                catalog.footprint("assembling-machine-1", Direction::East),
                Some((3, 3))
            );
        }

        #[test]
        fn direction_validity_follows_entry() {
            let catalog = Catalog::builtin();
            let furnace = catalog.lookup("stone-furnace").expect("furnace entry");
            assert!(furnace.supports_direction(Direction::North));
            assert!(!furnace.supports_direction(Direction::East));

            let belt = catalog.lookup("transport-belt").expect("belt entry");
            assert!(belt.supports_direction(Direction::West));
            assert!(!belt.supports_direction(Direction::NorthEast));
        }

        #[test]
        fn train_kinds_are_not_in_catalog() {
            let catalog = Catalog::builtin();
            for kind in TRAIN_KINDS {
                assert!(is_train_kind(kind));
                assert!(catalog.lookup(kind).is_none());
            }
            assert!(!is_train_kind("pipe"));
        }

        #[test]
        fn port_mask_rotates_with_direction() {
            let catalog = Catalog::builtin();
            let underground_pipe = catalog.lookup("pipe-to-ground").expect("entry");
            assert_eq!(underground_pipe.port_mask_for(Direction::North), PORT_NORTH);
            assert_eq!(underground_pipe.port_mask_for(Direction::East), PORT_EAST);
            assert_eq!(underground_pipe.port_mask_for(Direction::South), PORT_SOUTH);
            assert_eq!(underground_pipe.port_mask_for(Direction::West), PORT_WEST);

            let pipe = catalog.lookup("pipe").expect("entry");
            assert_eq!(pipe.port_mask_for(Direction::East), PORT_ALL);
        }
    }
}

pub mod document {
    use std::collections::{BTreeMap, HashMap};

    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use thiserror::Error;

    use crate::catalog::{
        Catalog, CatalogEntry, Category, PORT_EAST, PORT_NORTH, PORT_SOUTH, PORT_WEST,
    };
    use crate::grid::{Bounds, Cell, Direction, Offset, Position};

    /// 文档内稳定的实体标识。单调分配，被历史或连接引用期间不复用，
    /// 与导出序号无关（导出序号只在编码时按遍历顺序计算）。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum WireColor {
        Red,
        Green,
    }

    /// 连接边的类型。传送带邻接、信号线或流体接口。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum LinkKind {
        Transport,
        Signal(WireColor),
        Fluid,
    }

    /// 一条无向连接边，镜像存储在两端实体上。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Link {
        pub target: EntityId,
        pub kind: LinkKind,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DirectionType {
        Input,
        Output,
    }

    impl DirectionType {
        pub fn from_wire(raw: &str) -> Option<Self> {
            match raw {
                "input" => Some(DirectionType::Input),
                "output" => Some(DirectionType::Output),
                _ => None,
            }
        }

        pub fn as_wire(self) -> &'static str {
            match self {
                DirectionType::Input => "input",
                DirectionType::Output => "output",
            }
        }
    }

    /// 已放置的实体。属性包按目录条目的键集合校验。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Entity {
        pub kind: String,
        pub position: Position,
        pub direction: Direction,
        pub direction_type: Option<DirectionType>,
        pub properties: BTreeMap<String, Value>,
        pub links: Vec<Link>,
    }

    impl Entity {
        /// 实体占据的格子集合，由中心坐标与旋转后的占地推出。
        pub fn occupied_cells(&self, entry: &CatalogEntry) -> Vec<Cell> {
            let (w, h) = entry.footprint(self.direction);
            let origin_x = (self.position.x() - w as f64 / 2.0).floor() as i32;
            let origin_y = (self.position.y() - h as f64 / 2.0).floor() as i32;
            let mut cells = Vec::with_capacity((w * h) as usize);
            for dy in 0..h {
                for dx in 0..w {
                    cells.push(Cell::new(origin_x + dx as i32, origin_y + dy as i32));
                }
            }
            cells
        }

        /// 输出方向正前方的格子（传送带邻接规则使用）。
        pub fn output_cell(&self, entry: &CatalogEntry) -> Cell {
            let (step_x, step_y) = self.direction.offset();
            let (w, h) = entry.footprint(self.direction);
            let x = self.position.x() + step_x as f64 * (w as f64 / 2.0 + 0.5);
            let y = self.position.y() + step_y as f64 * (h as f64 / 2.0 + 0.5);
            Cell::new(x.floor() as i32, y.floor() as i32)
        }

        /// 各启用流体接口朝外一格的格子集合。
        pub fn fluid_port_cells(&self, entry: &CatalogEntry) -> Vec<Cell> {
            let mask = entry.port_mask_for(self.direction);
            if mask == 0 {
                return Vec::new();
            }
            let (w, h) = entry.footprint(self.direction);
            let origin_x = (self.position.x() - w as f64 / 2.0).floor() as i32;
            let origin_y = (self.position.y() - h as f64 / 2.0).floor() as i32;
            let mut cells = Vec::new();
            if mask & PORT_NORTH != 0 {
                for dx in 0..w {
                    cells.push(Cell::new(origin_x + dx as i32, origin_y - 1));
                }
            }
            if mask & PORT_SOUTH != 0 {
                for dx in 0..w {
                    cells.push(Cell::new(origin_x + dx as i32, origin_y + h as i32));
                }
            }
            if mask & PORT_EAST != 0 {
                for dy in 0..h {
                    cells.push(Cell::new(origin_x + w as i32, origin_y + dy as i32));
                }
            }
            if mask & PORT_WEST != 0 {
                for dy in 0..h {
                    cells.push(Cell::new(origin_x - 1, origin_y + dy as i32));
                }
            }
            cells
        }
    }

    /// 地面覆盖。每格至多一块。
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Tile {
        pub kind: String,
        pub cell: Cell,
    }

    #[derive(Debug, Error)]
    pub enum DocumentError {
        #[error("unknown kind {0:?}")]
        UnknownKind(String),
        #[error("{kind:?} is not a placeable {expected:?}")]
        WrongCategory { kind: String, expected: &'static str },
        #[error("entity with id {0} not found")]
        UnknownEntity(u64),
        #[error("placement conflicts with entity {0}")]
        PlacementConflict(u64),
        #[error("direction {direction:?} is not valid for {kind:?}")]
        InvalidDirection { kind: String, direction: Direction },
        #[error("property {key:?} is not allowed on {kind:?}")]
        PropertyNotAllowed { kind: String, key: String },
        #[error("cannot link entities {a} and {b}: {reason}")]
        LinkRejected { a: u64, b: u64, reason: String },
    }

    /// 单份蓝图文档：有序实体集、地面覆盖与元数据。实体的插入顺序
    /// 被保留，保证编码结果可复现。
    #[derive(Debug, Default, Clone)]
    pub struct Blueprint {
        label: String,
        description: String,
        icons: Vec<String>,
        entities: Vec<(EntityId, Entity)>,
        tiles: Vec<Tile>,
        occupancy: HashMap<Cell, EntityId>,
        next_entity_id: u64,
    }

    impl Blueprint {
        pub fn new(label: impl Into<String>) -> Self {
            Self {
                label: label.into(),
                ..Self::default()
            }
        }

        #[inline]
        pub fn label(&self) -> &str {
            &self.label
        }

        pub fn set_label(&mut self, label: impl Into<String>) {
            self.label = label.into();
        }

        #[inline]
        pub fn description(&self) -> &str {
            &self.description
        }

        pub fn set_description(&mut self, description: impl Into<String>) {
            self.description = description.into();
        }

        #[inline]
        pub fn icons(&self) -> &[String] {
            &self.icons
        }

        pub fn set_icons(&mut self, icons: Vec<String>) {
            self.icons = icons;
        }

        /// 放置新实体。占地冲突、未知类别或非法方向在任何改动前拒绝。
        pub fn add_entity(
            &mut self,
            kind: &str,
            position: Position,
            direction: Direction,
        ) -> Result<EntityId, DocumentError> {
            let entry = Self::entity_entry(kind)?;
            if !entry.supports_direction(direction) {
                return Err(DocumentError::InvalidDirection {
                    kind: kind.to_string(),
                    direction,
                });
            }
            let entity = Entity {
                kind: kind.to_string(),
                position,
                direction,
                direction_type: entry.flow_oriented.then_some(DirectionType::Input),
                properties: entry.default_properties(),
                links: Vec::new(),
            };
            let cells = entity.occupied_cells(entry);
            self.ensure_cells_free(&cells, None)?;

            let id = self.next_id();
            for cell in cells {
                self.occupancy.insert(cell, id);
            }
            self.entities.push((id, entity));
            Ok(id)
        }

        /// 以既有标识重新插入完整实体记录（解码导入与撤销重放使用）。
        /// 连接边会在仍然存在的对端上恢复镜像。
        pub fn insert_entity(&mut self, id: EntityId, entity: Entity) -> Result<(), DocumentError> {
            let entry = Self::entity_entry(&entity.kind)?;
            if !entry.supports_direction(entity.direction) {
                return Err(DocumentError::InvalidDirection {
                    kind: entity.kind.clone(),
                    direction: entity.direction,
                });
            }
            for key in entity.properties.keys() {
                if !entry.allows_property(key) {
                    return Err(DocumentError::PropertyNotAllowed {
                        kind: entity.kind.clone(),
                        key: key.clone(),
                    });
                }
            }
            if self.entity(id).is_some() {
                return Err(DocumentError::PlacementConflict(id.get()));
            }
            let mut entity = entity;
            entity
                .links
                .retain(|link| self.entity(link.target).is_some());
            let cells = entity.occupied_cells(entry);
            self.ensure_cells_free(&cells, None)?;

            for link in entity.links.clone() {
                if let Some(target) = self.entity_record_mut(link.target) {
                    let mirror = Link {
                        target: id,
                        kind: link.kind,
                    };
                    if !target.links.contains(&mirror) {
                        target.links.push(mirror);
                    }
                }
            }
            for cell in cells {
                self.occupancy.insert(cell, id);
            }
            self.next_entity_id = self.next_entity_id.max(id.get() + 1);
            self.entities.push((id, entity));
            Ok(())
        }

        /// 移除实体并切断所有指向它的连接边。返回含连接表的完整记录，
        /// 以便调用方撤销这次移除。
        pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity, DocumentError> {
            let index = self
                .entities
                .iter()
                .position(|(entity_id, _)| *entity_id == id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            let (_, entity) = self.entities.remove(index);
            if let Some(entry) = Catalog::builtin().lookup(&entity.kind) {
                for cell in entity.occupied_cells(entry) {
                    self.occupancy.remove(&cell);
                }
            }
            for (_, other) in &mut self.entities {
                other.links.retain(|link| link.target != id);
            }
            Ok(entity)
        }

        /// 平移实体。零位移恒被接受；新占地与他人冲突时不做任何改动。
        pub fn move_entity(&mut self, id: EntityId, offset: Offset) -> Result<(), DocumentError> {
            if offset.is_zero() {
                return Ok(());
            }
            let entity = self
                .entity(id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            let entry = Self::entity_entry(&entity.kind)?;
            let old_cells = entity.occupied_cells(entry);
            let moved = Entity {
                position: entity.position.translate(offset),
                ..entity.clone()
            };
            let new_cells = moved.occupied_cells(entry);
            self.ensure_cells_free(&new_cells, Some(id))?;

            for cell in old_cells {
                self.occupancy.remove(&cell);
            }
            for cell in new_cells {
                self.occupancy.insert(cell, id);
            }
            if let Some(record) = self.entity_record_mut(id) {
                record.position = moved.position;
            }
            Ok(())
        }

        /// 旋转实体到给定方向，占地可能随之互换宽高。
        pub fn rotate_entity(
            &mut self,
            id: EntityId,
            direction: Direction,
        ) -> Result<(), DocumentError> {
            let entity = self
                .entity(id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            let entry = Self::entity_entry(&entity.kind)?;
            if !entry.supports_direction(direction) {
                return Err(DocumentError::InvalidDirection {
                    kind: entity.kind.clone(),
                    direction,
                });
            }
            let old_cells = entity.occupied_cells(entry);
            let rotated = Entity {
                direction,
                ..entity.clone()
            };
            let new_cells = rotated.occupied_cells(entry);
            self.ensure_cells_free(&new_cells, Some(id))?;

            for cell in old_cells {
                self.occupancy.remove(&cell);
            }
            for cell in new_cells {
                self.occupancy.insert(cell, id);
            }
            if let Some(record) = self.entity_record_mut(id) {
                record.direction = direction;
            }
            Ok(())
        }

        pub fn set_direction_type(
            &mut self,
            id: EntityId,
            direction_type: DirectionType,
        ) -> Result<(), DocumentError> {
            let entity = self
                .entity(id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            let entry = Self::entity_entry(&entity.kind)?;
            if !entry.flow_oriented {
                return Err(DocumentError::PropertyNotAllowed {
                    kind: entity.kind.clone(),
                    key: "type".to_string(),
                });
            }
            if let Some(record) = self.entity_record_mut(id) {
                record.direction_type = Some(direction_type);
            }
            Ok(())
        }

        /// 写入属性。键必须在目录条目允许的集合内；`Null` 表示清除。
        /// 返回旧值，供调用方构造逆操作。
        pub fn set_property(
            &mut self,
            id: EntityId,
            key: &str,
            value: Value,
        ) -> Result<Option<Value>, DocumentError> {
            let entity = self
                .entity(id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            let entry = Self::entity_entry(&entity.kind)?;
            if !entry.allows_property(key) {
                return Err(DocumentError::PropertyNotAllowed {
                    kind: entity.kind.clone(),
                    key: key.to_string(),
                });
            }
            let record = self
                .entity_record_mut(id)
                .ok_or(DocumentError::UnknownEntity(id.get()))?;
            if value.is_null() {
                Ok(record.properties.remove(key))
            } else {
                Ok(record.properties.insert(key.to_string(), value))
            }
        }

        /// 建立一条类型化连接边。重复连接是幂等的。
        ///
        /// - 传送带边：目标必须占据源输出方向正前方的格子；
        /// - 流体边：双方都要有一个朝向对方占地的流体接口；
        /// - 信号边：无邻接要求，中心距不得超过两端较小的连线距离。
        pub fn link(
            &mut self,
            a: EntityId,
            b: EntityId,
            kind: LinkKind,
        ) -> Result<(), DocumentError> {
            if a == b {
                return Err(DocumentError::LinkRejected {
                    a: a.get(),
                    b: b.get(),
                    reason: "cannot link an entity to itself".to_string(),
                });
            }
            let source = self.entity(a).ok_or(DocumentError::UnknownEntity(a.get()))?;
            let target = self.entity(b).ok_or(DocumentError::UnknownEntity(b.get()))?;
            let source_entry = Self::entity_entry(&source.kind)?;
            let target_entry = Self::entity_entry(&target.kind)?;

            let reject = |reason: String| DocumentError::LinkRejected {
                a: a.get(),
                b: b.get(),
                reason,
            };
            match kind {
                LinkKind::Transport => {
                    let front = source.output_cell(source_entry);
                    let occupied = target
                        .occupied_cells(target_entry)
                        .iter()
                        .any(|cell| *cell == front);
                    if !occupied {
                        return Err(reject(format!(
                            "target does not occupy the output cell ({}, {})",
                            front.x, front.y
                        )));
                    }
                }
                LinkKind::Fluid => {
                    let source_cells = source.occupied_cells(source_entry);
                    let target_cells = target.occupied_cells(target_entry);
                    let source_reaches = source
                        .fluid_port_cells(source_entry)
                        .iter()
                        .any(|cell| target_cells.contains(cell));
                    let target_reaches = target
                        .fluid_port_cells(target_entry)
                        .iter()
                        .any(|cell| source_cells.contains(cell));
                    if !source_reaches || !target_reaches {
                        return Err(reject("fluid ports are not aligned".to_string()));
                    }
                }
                LinkKind::Signal(_) => {
                    let reach = source_entry.wire_reach.min(target_entry.wire_reach);
                    let distance = source.position.distance(target.position);
                    if distance > reach {
                        return Err(reject(format!(
                            "distance {distance:.1} exceeds wire reach {reach:.1}"
                        )));
                    }
                }
            }

            self.push_link(a, Link { target: b, kind });
            self.push_link(b, Link { target: a, kind });
            Ok(())
        }

        /// 拆除一条连接边。边不存在时静默成功。
        pub fn unlink(
            &mut self,
            a: EntityId,
            b: EntityId,
            kind: LinkKind,
        ) -> Result<(), DocumentError> {
            if self.entity(a).is_none() {
                return Err(DocumentError::UnknownEntity(a.get()));
            }
            if self.entity(b).is_none() {
                return Err(DocumentError::UnknownEntity(b.get()));
            }
            if let Some(record) = self.entity_record_mut(a) {
                record
                    .links
                    .retain(|link| !(link.target == b && link.kind == kind));
            }
            if let Some(record) = self.entity_record_mut(b) {
                record
                    .links
                    .retain(|link| !(link.target == a && link.kind == kind));
            }
            Ok(())
        }

        /// 实体的连接表。未知标识返回空切片（纯查询，无副作用）。
        pub fn neighbors(&self, id: EntityId) -> &[Link] {
            self.entity(id).map(|entity| &entity.links[..]).unwrap_or(&[])
        }

        /// 仅同族实体之间允许复制配置（把熔炉配方粘到传送带上是拒绝，
        /// 不是忽略）。
        pub fn can_link_settings(&self, a: EntityId, b: EntityId) -> bool {
            let catalog = Catalog::builtin();
            match (self.entity(a), self.entity(b)) {
                (Some(source), Some(target)) => {
                    match (catalog.lookup(&source.kind), catalog.lookup(&target.kind)) {
                        (Some(se), Some(te)) => se.family == te.family,
                        _ => false,
                    }
                }
                _ => false,
            }
        }

        #[inline]
        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.entities
                .iter()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        #[inline]
        pub fn entity_at(&self, cell: Cell) -> Option<EntityId> {
            self.occupancy.get(&cell).copied()
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.entities.len()
        }

        /// 铺设地面覆盖，返回被替换的旧覆盖。
        pub fn set_tile(&mut self, cell: Cell, kind: &str) -> Result<Option<Tile>, DocumentError> {
            let entry = Catalog::builtin()
                .lookup(kind)
                .ok_or_else(|| DocumentError::UnknownKind(kind.to_string()))?;
            if entry.category != Category::Tile {
                return Err(DocumentError::WrongCategory {
                    kind: kind.to_string(),
                    expected: "tile",
                });
            }
            let replaced = self.remove_tile(cell);
            self.tiles.push(Tile {
                kind: kind.to_string(),
                cell,
            });
            Ok(replaced)
        }

        pub fn remove_tile(&mut self, cell: Cell) -> Option<Tile> {
            let index = self.tiles.iter().position(|tile| tile.cell == cell)?;
            Some(self.tiles.remove(index))
        }

        #[inline]
        pub fn tile_at(&self, cell: Cell) -> Option<&Tile> {
            self.tiles.iter().find(|tile| tile.cell == cell)
        }

        #[inline]
        pub fn tiles(&self) -> &[Tile] {
            &self.tiles
        }

        /// 空文档：零实体且零覆盖。空是合法状态，不是错误。
        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entities.is_empty() && self.tiles.is_empty()
        }

        pub fn bounds(&self) -> Option<Bounds> {
            let catalog = Catalog::builtin();
            let mut bounds = Bounds::empty();
            for (_, entity) in &self.entities {
                if let Some(entry) = catalog.lookup(&entity.kind) {
                    for cell in entity.occupied_cells(entry) {
                        bounds.include_cell(cell);
                    }
                }
            }
            for tile in &self.tiles {
                bounds.include_cell(tile.cell);
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        fn entity_entry(kind: &str) -> Result<&'static CatalogEntry, DocumentError> {
            let entry = Catalog::builtin()
                .lookup(kind)
                .ok_or_else(|| DocumentError::UnknownKind(kind.to_string()))?;
            if entry.category != Category::Entity {
                return Err(DocumentError::WrongCategory {
                    kind: kind.to_string(),
                    expected: "entity",
                });
            }
            Ok(entry)
        }

        fn ensure_cells_free(
            &self,
            cells: &[Cell],
            ignore: Option<EntityId>,
        ) -> Result<(), DocumentError> {
            for cell in cells {
                if let Some(other) = self.occupancy.get(cell) {
                    if Some(*other) != ignore {
                        return Err(DocumentError::PlacementConflict(other.get()));
                    }
                }
            }
            Ok(())
        }

        fn entity_record_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
            self.entities
                .iter_mut()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        fn push_link(&mut self, id: EntityId, link: Link) {
            if let Some(record) = self.entity_record_mut(id) {
                if !record.links.contains(&link) {
                    record.links.push(link);
                }
            }
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    /// 有序的蓝图册。活动下标在非空册内始终合法。
    #[derive(Debug, Default, Clone)]
    pub struct Book {
        label: String,
        blueprints: Vec<Blueprint>,
        active: usize,
    }

    impl Book {
        pub fn new(label: impl Into<String>) -> Self {
            Self {
                label: label.into(),
                ..Self::default()
            }
        }

        #[inline]
        pub fn label(&self) -> &str {
            &self.label
        }

        pub fn push(&mut self, blueprint: Blueprint) {
            self.blueprints.push(blueprint);
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.blueprints.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.blueprints.is_empty()
        }

        /// 最后一个合法下标；空册为 None。
        #[inline]
        pub fn last_index(&self) -> Option<usize> {
            self.len().checked_sub(1)
        }

        #[inline]
        pub fn active_index(&self) -> usize {
            self.active
        }

        /// 取指定下标的蓝图，未给下标时用当前活动下标。越界的下标
        /// 被钳制到最后一个合法位置（从不报错），活动下标随之更新。
        pub fn get_blueprint(&mut self, index: Option<usize>) -> Option<&Blueprint> {
            let last = self.last_index()?;
            if let Some(index) = index {
                self.active = index.min(last);
            } else {
                self.active = self.active.min(last);
            }
            self.blueprints.get(self.active)
        }

        /// 与 [`Book::get_blueprint`] 同语义的可变版本。
        pub fn get_blueprint_mut(&mut self, index: Option<usize>) -> Option<&mut Blueprint> {
            let last = self.last_index()?;
            if let Some(index) = index {
                self.active = index.min(last);
            } else {
                self.active = self.active.min(last);
            }
            self.blueprints.get_mut(self.active)
        }

        #[inline]
        pub fn blueprints(&self) -> impl Iterator<Item = &Blueprint> {
            self.blueprints.iter()
        }
    }

    /// 解码结果：单份蓝图或一册蓝图。
    #[derive(Debug, Clone)]
    pub enum Document {
        Blueprint(Blueprint),
        Book(Book),
    }

    impl Document {
        pub fn is_empty(&self) -> bool {
            match self {
                Document::Blueprint(blueprint) => blueprint.is_empty(),
                Document::Book(book) => {
                    book.is_empty() || book.blueprints().all(Blueprint::is_empty)
                }
            }
        }
    }

}
