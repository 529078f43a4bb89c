//! 可渲染几何: 折线与管道表面.

use nalgebra::{Point3, Vector3};

use crate::consts::SURFACE_SIDES;
use crate::data::group::TubeGroup;
use crate::data::tube::{Tube, TubePoint};

/// 逐点数据数组.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    /// 数组名.
    pub name: &'static str,
    /// 每个点的分量个数.
    pub components: usize,
    /// 按点依次排列的值, 长度为 `components * 点数`.
    pub values: Vec<f64>,
}

/// 折线集合. 每条 tube 对应一条折线.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyLines {
    /// 全部点.
    pub points: Vec<Point3<f64>>,
    /// 每条折线的点下标.
    pub lines: Vec<Vec<usize>>,
    /// 逐点数据.
    pub arrays: Vec<DataArray>,
}

impl PolyLines {
    /// 根据名字获取数组.
    pub fn array(&self, name: &str) -> Option<&DataArray> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

/// 三角网格形式的管道表面.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceMesh {
    /// 顶点.
    pub vertices: Vec<Point3<f64>>,
    /// 顶点法向.
    pub normals: Vec<Vector3<f64>>,
    /// 顶点所属的 tube 编号.
    pub tube_ids: Vec<u32>,
    /// 三角形顶点下标.
    pub triangles: Vec<[usize; 3]>,
}

/// 渲染前的清理: 去除重复点并重新计算切向和法向. 少于 2 个点的 tube 被跳过.
fn prepared(group: &TubeGroup) -> Vec<Tube> {
    group
        .all_tubes()
        .into_iter()
        .filter_map(|t| {
            let mut t = t.clone();
            t.remove_duplicate_points();
            t.compute_tangents_and_normals();
            (t.len() >= 2).then_some(t)
        })
        .collect()
}

/// 单分量数组的名字和取值.
const SCALARS: [(&str, fn(&TubePoint) -> f64); 10] = [
    ("Radius", |p| p.radius),
    ("Alpha1", |p| p.alpha[0]),
    ("Alpha2", |p| p.alpha[1]),
    ("Alpha3", |p| p.alpha[2]),
    ("Ridgeness", |p| p.ridgeness),
    ("Medialness", |p| p.medialness),
    ("Branchness", |p| p.branchness),
    ("Intensity", |p| p.intensity),
    ("Curvature", |p| p.curvature),
    ("Roundness", |p| p.roundness),
];

/// 将组内全部 tube 转为折线, 并附带逐点数据.
pub fn to_polylines(group: &TubeGroup) -> PolyLines {
    let tubes = prepared(group);
    let mut out = PolyLines::default();
    let mut ids = Vec::new();
    let mut color = Vec::new();
    let mut vectors: [Vec<f64>; 3] = Default::default();
    let mut scalars: Vec<Vec<f64>> = vec![Vec::new(); SCALARS.len() + 1];

    for t in tubes.iter() {
        let start = out.points.len();
        for p in t.points() {
            out.points.push(p.position);
            ids.push(t.id() as f64);
            color.extend_from_slice(&p.color);
            for (v, d) in vectors.iter_mut().zip([p.tangent, p.normal1, p.normal2]) {
                v.extend(d.iter());
            }
            for (s, (_, f)) in scalars.iter_mut().zip(SCALARS.iter()) {
                s.push(f(p));
            }
            if let Some(s) = scalars.last_mut() {
                s.push(p.levelness);
            }
        }
        out.lines.push((start..out.points.len()).collect());
    }

    let one = |name, values| DataArray {
        name,
        components: 1,
        values,
    };
    let [tangent, normal1, normal2] = vectors;
    let levelness = scalars.pop().unwrap_or_default();
    out.arrays.push(one("Id", ids));
    out.arrays.push(DataArray {
        name: "Color",
        components: 4,
        values: color,
    });
    for (name, values) in [("Tangent", tangent), ("Normal1", normal1), ("Normal2", normal2)] {
        out.arrays.push(DataArray {
            name,
            components: 3,
            values,
        });
    }
    for (&(name, _), values) in SCALARS.iter().zip(scalars) {
        out.arrays.push(one(name, values));
    }
    out.arrays.push(one("Levelness", levelness));
    out
}

/// 将组内全部 tube 转为两端封闭的管道表面, 截面为 `sides` 边形 (至少 3 边).
pub fn to_surfaces(group: &TubeGroup, sides: usize) -> SurfaceMesh {
    let sides = sides.max(3);
    let mut mesh = SurfaceMesh::default();
    for t in prepared(group).iter() {
        let base = mesh.vertices.len();
        let pts = t.points();
        for p in pts {
            for k in 0..sides {
                let a = k as f64 * std::f64::consts::TAU / sides as f64;
                let dir = p.normal1 * a.cos() + p.normal2 * a.sin();
                mesh.vertices.push(p.position + dir * p.radius);
                mesh.normals.push(dir);
                mesh.tube_ids.push(t.id());
            }
        }
        let ring = |i: usize, k: usize| base + i * sides + k % sides;
        for i in 0..pts.len() - 1 {
            for k in 0..sides {
                mesh.triangles.push([ring(i, k), ring(i + 1, k), ring(i + 1, k + 1)]);
                mesh.triangles.push([ring(i, k), ring(i + 1, k + 1), ring(i, k + 1)]);
            }
        }

        // 两端的封口.
        let last = pts.len() - 1;
        for (i, outward) in [(0, -pts[0].tangent), (last, pts[last].tangent)] {
            let c = mesh.vertices.len();
            mesh.vertices.push(pts[i].position);
            mesh.normals.push(outward);
            mesh.tube_ids.push(t.id());
            for k in 0..sides {
                if i == 0 {
                    mesh.triangles.push([c, ring(i, k + 1), ring(i, k)]);
                } else {
                    mesh.triangles.push([c, ring(i, k), ring(i, k + 1)]);
                }
            }
        }
    }
    mesh
}

/// 使用默认边数的管道表面.
#[inline]
pub fn to_default_surfaces(group: &TubeGroup) -> SurfaceMesh {
    to_surfaces(group, SURFACE_SIDES)
}
