// src/types/mod.rs

//! 数据类型：String / List / SortedSet 的命令实现，以及有序集合底层的 AVL 树。

pub mod avl;
pub mod list;
pub mod string;
pub mod zset;
