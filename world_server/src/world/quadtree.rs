//! Mutable quadtree over the map rectangle.
//!
//! Leaves hold up to [`MAX_PLAYERS_PER_NODE`] ids and subdivide on
//! overflow until [`MAX_DEPTH`], where they grow unbounded instead. A side
//! table of player positions means removal never needs the caller to
//! remember where a player was, and lets redistribution and exact-distance
//! query filtering read positions without touching the world.
//!
//! Containment is half-open (`[x, x+w) × [y, y+h)`) so a point on a
//! subdivision boundary belongs to exactly one child.

use std::collections::HashMap;

use meridian_protocol::Vec2;

pub const MAX_PLAYERS_PER_NODE: usize = 4;
pub const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x && point.x < self.x + self.width && point.y >= self.y && point.y < self.y + self.height
    }

    /// AABB-vs-circle via the closest point on the rectangle.
    pub fn intersects_circle(&self, center: Vec2, radius: f32) -> bool {
        let closest = Vec2::new(
            center.x.clamp(self.x, self.x + self.width),
            center.y.clamp(self.y, self.y + self.height),
        );
        center.distance_squared(closest) <= radius * radius
    }
}

struct Node {
    bounds: Bounds,
    player_ids: Vec<u64>,
    /// NW, NE, SW, SE. A node is a leaf iff this is `None`.
    children: Option<Box<[Node; 4]>>,
}

impl Node {
    fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            player_ids: Vec::new(),
            children: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn subdivide(&mut self) {
        let hw = self.bounds.width * 0.5;
        let hh = self.bounds.height * 0.5;
        let Bounds { x, y, .. } = self.bounds;
        self.children = Some(Box::new([
            Node::new(Bounds::new(x, y, hw, hh)),
            Node::new(Bounds::new(x + hw, y, hw, hh)),
            Node::new(Bounds::new(x, y + hh, hw, hh)),
            Node::new(Bounds::new(x + hw, y + hh, hw, hh)),
        ]));
    }

    fn child_containing_mut(&mut self, point: Vec2) -> Option<&mut Node> {
        self.children
            .as_deref_mut()
            .and_then(|children| children.iter_mut().find(|c| c.bounds.contains(point)))
    }
}

pub struct QuadTree {
    root: Node,
    positions: HashMap<u64, Vec2>,
}

impl QuadTree {
    /// Build a tree over the given map rectangle. Width and height must be
    /// positive.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        assert!(width > 0.0 && height > 0.0, "quadtree bounds must have positive extent");
        Self {
            root: Node::new(Bounds::new(x, y, width, height)),
            positions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, player_id: u64, position: Vec2) {
        self.positions.insert(player_id, position);
        Self::insert_into(&mut self.root, &self.positions, player_id, position, 0);
    }

    pub fn remove(&mut self, player_id: u64) {
        if let Some(position) = self.positions.remove(&player_id) {
            Self::remove_from(&mut self.root, player_id, position);
        }
    }

    /// Move a player: remove-then-insert. O(log n) twice per tick per
    /// moving player, which is cheap enough at this map scale.
    pub fn update(&mut self, player_id: u64, new_position: Vec2) {
        self.remove(player_id);
        self.insert(player_id, new_position);
    }

    /// All player ids within `radius` of `center`, exact.
    pub fn query(&self, center: Vec2, radius: f32) -> Vec<u64> {
        let mut result = Vec::new();
        Self::query_node(&self.root, &self.positions, center, radius, &mut result);
        result
    }

    /// The position the index currently has for a player.
    pub fn position_of(&self, player_id: u64) -> Option<Vec2> {
        self.positions.get(&player_id).copied()
    }

    pub fn total_players(&self) -> usize {
        self.positions.len()
    }

    pub fn total_nodes(&self) -> usize {
        Self::count_nodes(&self.root)
    }

    /// Drop every player and all subdivisions.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.root.player_ids.clear();
        self.root.children = None;
    }

    fn insert_into(node: &mut Node, positions: &HashMap<u64, Vec2>, player_id: u64, position: Vec2, depth: usize) {
        if node.is_leaf() {
            node.player_ids.push(player_id);
            if node.player_ids.len() > MAX_PLAYERS_PER_NODE && depth < MAX_DEPTH {
                node.subdivide();
                let to_redistribute = std::mem::take(&mut node.player_ids);
                for pid in to_redistribute {
                    let pos = positions.get(&pid).copied().unwrap_or(position);
                    if let Some(child) = node.child_containing_mut(pos) {
                        Self::insert_into(child, positions, pid, pos, depth + 1);
                    }
                }
            }
        } else if let Some(child) = node.child_containing_mut(position) {
            Self::insert_into(child, positions, player_id, position, depth + 1);
        }
    }

    fn remove_from(node: &mut Node, player_id: u64, position: Vec2) -> bool {
        if !node.bounds.contains(position) {
            return false;
        }
        if node.is_leaf() {
            if let Some(index) = node.player_ids.iter().position(|&id| id == player_id) {
                node.player_ids.swap_remove(index);
                return true;
            }
            return false;
        }
        node.children
            .as_deref_mut()
            .map(|children| children.iter_mut().any(|c| Self::remove_from(c, player_id, position)))
            .unwrap_or(false)
    }

    fn query_node(node: &Node, positions: &HashMap<u64, Vec2>, center: Vec2, radius: f32, result: &mut Vec<u64>) {
        if !node.bounds.intersects_circle(center, radius) {
            return;
        }
        if node.is_leaf() {
            let radius_squared = radius * radius;
            for &player_id in &node.player_ids {
                if let Some(&position) = positions.get(&player_id) {
                    if position.distance_squared(center) <= radius_squared {
                        result.push(player_id);
                    }
                }
            }
        } else if let Some(children) = node.children.as_deref() {
            for child in children.iter() {
                Self::query_node(child, positions, center, radius, result);
            }
        }
    }

    fn count_nodes(node: &Node) -> usize {
        1 + node
            .children
            .as_deref()
            .map(|children| children.iter().map(Self::count_nodes).sum())
            .unwrap_or(0)
    }
}
