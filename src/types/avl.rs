// src/types/avl.rs

//! # Order-statistics AVL tree
//!
//! Backs the sorted-set type. Nodes are ordered by `(score, member)` and every node
//! caches its height and subtree size, which gives O(log n) rank arithmetic.
//!
//! Placement is score-driven but lookups are member-driven: `remove`, `score` and
//! `rank` only know the member, so they search both subtrees when the current node
//! does not match. A member→score side index would make them O(log n) at the cost of
//! a second copy of every member.

use std::cmp::Ordering;

use crate::error::{KvError, Result};

type Link = Option<Box<Node>>;

#[derive(Debug, Clone)]
struct Node {
    score: f64,
    member: String,
    left: Link,
    right: Link,
    height: u32,
    size: usize,
}

impl Node {
    fn new(score: f64, member: String) -> Box<Self> {
        Box::new(Node {
            score,
            member,
            left: None,
            right: None,
            height: 1,
            size: 1,
        })
    }

    fn update(&mut self) {
        self.height = height(&self.left).max(height(&self.right)) + 1;
        self.size = size(&self.left) + size(&self.right) + 1;
    }

    fn balance_factor(&self) -> i64 {
        height(&self.left) as i64 - height(&self.right) as i64
    }

    /// `true` when `(score, member)` sorts at or before this node.
    fn goes_left(&self, score: f64, member: &str) -> bool {
        match score.total_cmp(&self.score) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => member <= self.member.as_str(),
        }
    }
}

fn height(link: &Link) -> u32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

/// One `(member, score)` pair as returned by range queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Sorted set: unique members ordered by score.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    root: Link,
}

impl SortedSet {
    pub fn new() -> Self {
        SortedSet { root: None }
    }

    /// Number of members, read from the root's cached size.
    pub fn len(&self) -> usize {
        size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert `member` at `score`. An existing entry for the member is removed first,
    /// since its old position is unrelated to the new score.
    pub fn add(&mut self, score: f64, member: &str) {
        if self.score(member).is_ok() {
            let (root, removed) = remove(self.root.take(), member);
            self.root = root;
            assert!(removed, "member {member} vanished between lookup and removal");
        }
        self.root = Some(insert(self.root.take(), score, member));
    }

    pub fn remove(&mut self, member: &str) -> Result<()> {
        if self.root.is_none() {
            return Err(KvError::NotFound);
        }
        let (root, removed) = remove(self.root.take(), member);
        self.root = root;
        if removed { Ok(()) } else { Err(KvError::NotFound) }
    }

    pub fn score(&self, member: &str) -> Result<f64> {
        find_score(&self.root, member).ok_or(KvError::NotFound)
    }

    /// Zero-based rank: the number of members sorting strictly before `member`.
    pub fn rank(&self, member: &str) -> Result<usize> {
        find_rank(&self.root, member).ok_or(KvError::NotFound)
    }

    /// Members with rank in `[start, end]`, `end` clipped to the last rank.
    pub fn range_by_rank(&self, start: usize, end: usize) -> Vec<ScoredMember> {
        let mut out = Vec::new();
        if self.is_empty() || start > end {
            return out;
        }
        let end = end.min(self.len() - 1);
        collect_by_rank(&self.root, start, end, &mut out);
        out
    }

    /// Members with `min <= score <= max`, in ascending order.
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<ScoredMember> {
        let mut out = Vec::new();
        if min > max {
            return out;
        }
        collect_by_score(&self.root, min, max, &mut out);
        out
    }

    /// Every member in rank order.
    pub fn entries(&self) -> Vec<ScoredMember> {
        self.range_by_rank(0, usize::MAX)
    }
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node
        .right
        .take()
        .expect("left rotation requires a right child");
    node.right = pivot.left.take();
    node.update();
    pivot.left = Some(node);
    pivot.update();
    pivot
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node
        .left
        .take()
        .expect("right rotation requires a left child");
    node.left = pivot.right.take();
    node.update();
    pivot.right = Some(node);
    pivot.update();
    pivot
}

/// Refresh cached fields and restore the AVL property at `node`.
/// One of its subtrees has just changed height by at most one.
fn balance(mut node: Box<Node>) -> Box<Node> {
    node.update();
    let bf = node.balance_factor();
    let node = if bf >= 2 {
        let left_bf = node.left.as_ref().map_or(0, |l| l.balance_factor());
        if left_bf < 0 {
            node.left = node.left.take().map(rotate_left);
        }
        rotate_right(node)
    } else if bf <= -2 {
        let right_bf = node.right.as_ref().map_or(0, |r| r.balance_factor());
        if right_bf > 0 {
            node.right = node.right.take().map(rotate_right);
        }
        rotate_left(node)
    } else {
        node
    };
    assert!(
        node.balance_factor().abs() <= 1,
        "tree unbalanced at member {} (factor {})",
        node.member,
        node.balance_factor()
    );
    node
}

fn insert(link: Link, score: f64, member: &str) -> Box<Node> {
    match link {
        None => Node::new(score, member.to_string()),
        Some(mut node) => {
            if node.goes_left(score, member) {
                node.left = Some(insert(node.left.take(), score, member));
            } else {
                node.right = Some(insert(node.right.take(), score, member));
            }
            balance(node)
        }
    }
}

/// Detach the minimum of the subtree rooted at `node`.
/// Returns the remaining subtree and the detached node.
fn take_min(mut node: Box<Node>) -> (Link, Box<Node>) {
    match node.left.take() {
        None => (node.right.take(), node),
        Some(left) => {
            let (rest, min) = take_min(left);
            node.left = rest;
            (Some(balance(node)), min)
        }
    }
}

fn remove(link: Link, member: &str) -> (Link, bool) {
    let Some(mut node) = link else {
        return (None, false);
    };

    if node.member == member {
        let replacement = match (node.left.take(), node.right.take()) {
            (None, None) => None,
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (Some(l), Some(r)) => {
                let (rest, mut successor) = take_min(r);
                successor.left = Some(l);
                successor.right = rest;
                Some(balance(successor))
            }
        };
        return (replacement, true);
    }

    let (left, removed) = remove(node.left.take(), member);
    node.left = left;
    if removed {
        return (Some(balance(node)), true);
    }

    let (right, removed) = remove(node.right.take(), member);
    node.right = right;
    if removed {
        return (Some(balance(node)), true);
    }

    (Some(node), false)
}

fn find_score(link: &Link, member: &str) -> Option<f64> {
    let node = link.as_ref()?;
    if node.member == member {
        return Some(node.score);
    }
    find_score(&node.left, member).or_else(|| find_score(&node.right, member))
}

fn find_rank(link: &Link, member: &str) -> Option<usize> {
    let node = link.as_ref()?;
    let here = size(&node.left);
    if node.member == member {
        return Some(here);
    }
    if let Some(rank) = find_rank(&node.left, member) {
        return Some(rank);
    }
    find_rank(&node.right, member).map(|rank| here + 1 + rank)
}

// Ranks are relative to the subtree being visited.
fn collect_by_rank(link: &Link, start: usize, end: usize, out: &mut Vec<ScoredMember>) {
    let Some(node) = link.as_ref() else {
        return;
    };
    if start > end {
        return;
    }
    let here = size(&node.left);
    if start < here {
        collect_by_rank(&node.left, start, end.min(here - 1), out);
    }
    if start <= here && here <= end {
        out.push(ScoredMember {
            member: node.member.clone(),
            score: node.score,
        });
    }
    if end > here {
        collect_by_rank(
            &node.right,
            start.saturating_sub(here + 1),
            end - (here + 1),
            out,
        );
    }
}

// Equal scores may sit on either side of a node (ties are broken by member), so both
// bounds are inclusive when deciding which subtrees to visit.
fn collect_by_score(link: &Link, min: f64, max: f64, out: &mut Vec<ScoredMember>) {
    let Some(node) = link.as_ref() else {
        return;
    };
    if min <= node.score {
        collect_by_score(&node.left, min, max, out);
    }
    if min <= node.score && node.score <= max {
        out.push(ScoredMember {
            member: node.member.clone(),
            score: node.score,
        });
    }
    if max >= node.score {
        collect_by_score(&node.right, min, max, out);
    }
}
