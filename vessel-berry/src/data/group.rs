//! 血管集合: 可嵌套的 tube 树.

use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::tube::Tube;
use crate::error::{VesselError, VesselResult};

/// 组内的一个子对象.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GroupChild {
    /// 单条 tube.
    Tube(Tube),

    /// 子组.
    Group(TubeGroup),
}

/// tube 的有序集合, 可以嵌套. 持久化和可视化都以它为单位.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TubeGroup {
    id: u32,
    children: Vec<GroupChild>,
}

impl TubeGroup {
    /// 创建空组.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }

    /// 由一组 tube 创建扁平组.
    pub fn with_tubes<I: IntoIterator<Item = Tube>>(id: u32, tubes: I) -> Self {
        Self {
            id,
            children: tubes.into_iter().map(GroupChild::Tube).collect(),
        }
    }

    /// 标识符.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 直接子对象.
    #[inline]
    pub fn children(&self) -> &[GroupChild] {
        &self.children
    }

    /// 追加 tube.
    #[inline]
    pub fn push_tube(&mut self, tube: Tube) {
        self.children.push(GroupChild::Tube(tube));
    }

    /// 追加子组.
    #[inline]
    pub fn push_group(&mut self, group: TubeGroup) {
        self.children.push(GroupChild::Group(group));
    }

    /// 树的深度. 只含 tube 的组深度为 1, 空组深度为 0.
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| match c {
                GroupChild::Tube(_) => 1,
                GroupChild::Group(g) => 1 + g.depth(),
            })
            .max()
            .unwrap_or(0)
    }

    /// 以深度优先顺序收集深度不超过 `max_depth` 的全部 tube.
    ///
    /// 直接子 tube 的深度为 1. `max_depth == 0` 时返回空 `Vec`.
    pub fn flatten(&self, max_depth: usize) -> Vec<&Tube> {
        let mut out = Vec::new();
        self.collect_into(max_depth, &mut out);
        out
    }

    fn collect_into<'a>(&'a self, max_depth: usize, out: &mut Vec<&'a Tube>) {
        if max_depth == 0 {
            return;
        }
        for c in self.children.iter() {
            match c {
                GroupChild::Tube(t) => out.push(t),
                GroupChild::Group(g) => g.collect_into(max_depth - 1, out),
            }
        }
    }

    /// 以深度优先顺序收集全部 tube.
    #[inline]
    pub fn all_tubes(&self) -> Vec<&Tube> {
        self.flatten(usize::MAX)
    }

    /// 对每条 tube (任意深度) 施加 `op`.
    pub fn for_each_tube_mut<F: FnMut(&mut Tube)>(&mut self, op: &mut F) {
        for c in self.children.iter_mut() {
            match c {
                GroupChild::Tube(t) => op(t),
                GroupChild::Group(g) => g.for_each_tube_mut(op),
            }
        }
    }

    /// tube 总数 (任意深度).
    #[inline]
    pub fn len(&self) -> usize {
        self.all_tubes().len()
    }

    /// 是否不含任何 tube?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 标识符为 `id` 的 tube 在 `self.flatten(max_depth)` 中的位置.
    pub fn tube_index(&self, id: u32, max_depth: usize) -> Option<usize> {
        self.flatten(max_depth).iter().position(|t| t.id() == id)
    }

    /// 根据标识符获取 tube.
    pub fn tube(&self, id: u32) -> Option<&Tube> {
        self.all_tubes().into_iter().find(|t| t.id() == id)
    }

    /// 以 `ids` 中出现的 tube 构造新的扁平组, 保持原有顺序.
    pub fn subset(&self, ids: &[u32]) -> TubeGroup {
        let wanted: HashSet<u32> = ids.iter().copied().collect();
        TubeGroup::with_tubes(
            self.id,
            self.all_tubes()
                .into_iter()
                .filter(|t| wanted.contains(&t.id()))
                .cloned(),
        )
    }

    /// 检查 tube 标识符在组内是否唯一.
    pub fn validate_unique_ids(&self) -> VesselResult<()> {
        let mut seen = HashSet::new();
        for t in self.all_tubes() {
            if !seen.insert(t.id()) {
                return Err(VesselError::format(format!("duplicate tube id {}", t.id())));
            }
        }
        Ok(())
    }
}
