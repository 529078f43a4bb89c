//! tube 树的 MetaScene (`.tre`) 持久化.
//!
//! 文件由若干对象块组成: 每块以 `ObjectType = ...` 开始, 随后为键值对头部;
//! tube 块在 `Points =` 之后逐行给出点数据, 列由 `PointDim` 命名.
//! 组块以 `ParentID` 引用父组, 读取时据此重建嵌套结构.
//!
//! 浮点数以最短可往返形式写出, 因此文本形式无损.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use itertools::Itertools;
use nalgebra::{Point3, Vector3};

use crate::data::group::{GroupChild, TubeGroup};
use crate::data::tube::{Tube, TubePoint};
use crate::error::{VesselError, VesselResult};

/// 写出的逐点列.
const POINT_DIM: [&str; 28] = [
    "x", "y", "z", "r", "v1x", "v1y", "v1z", "v2x", "v2y", "v2z", "tx", "ty", "tz", "red",
    "green", "blue", "alpha", "id", "mness", "rn", "boundness", "curv", "levelness", "roundness",
    "intensity", "a1", "a2", "a3",
];

/// 根组的 `ParentID`.
const NO_PARENT: i64 = -1;

fn join(xs: &[f64]) -> String {
    xs.iter().join(" ")
}

fn point_row(p: &TubePoint, id: u32) -> [f64; 28] {
    let (x, v1, v2, t) = (p.position, p.normal1, p.normal2, p.tangent);
    let c = p.color;
    [
        x.x, x.y, x.z, p.radius, v1.x, v1.y, v1.z, v2.x, v2.y, v2.z, t.x, t.y, t.z, c[0], c[1],
        c[2], c[3], id as f64, p.medialness, p.ridgeness, p.branchness, p.curvature, p.levelness,
        p.roundness, p.intensity, p.alpha[0], p.alpha[1], p.alpha[2],
    ]
}

impl TubeGroup {
    /// 以 MetaScene 文本形式序列化.
    pub fn to_tre_string(&self) -> String {
        let mut out = String::new();
        let count = count_objects(self);
        // 写入 `String` 不会失败.
        let _ = writeln!(out, "ObjectType = Scene\nNDims = 3\nNObjects = {count}");
        write_group(&mut out, self, NO_PARENT);
        out
    }

    /// 保存为 `.tre` 文件.
    pub fn save_tre<P: AsRef<Path>>(&self, path: P) -> VesselResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_tre_string()).map_err(|e| VesselError::io(path, e))
    }

    /// 从 MetaScene 文本重建.
    ///
    /// # 注意
    ///
    /// 1. 只含 tube 而没有组的文件会被放入标识符为 0 的根组;
    /// 2. 不支持带旋转的对象 (`TransformMatrix` 必须为单位阵);
    /// 3. 未知的点列会被忽略, 缺失的点列取默认值, 但 `x y z` 必须存在.
    pub fn from_tre_str(s: &str) -> VesselResult<Self> {
        let mut lines = s.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
        let mut stack: Vec<(i64, TubeGroup)> = Vec::new();

        while let Some(line) = lines.next() {
            let (key, kind) = key_value(line)?;
            if key != "ObjectType" {
                return Err(VesselError::format(format!("expected `ObjectType`, found `{line}`")));
            }
            let mut fields = HashMap::new();
            while let Some(&next) = lines.peek() {
                let (k, v) = key_value(next)?;
                if k == "ObjectType" {
                    break;
                }
                lines.next();
                if k == "Points" {
                    break;
                }
                fields.insert(k, v);
            }

            match kind {
                "Scene" => continue,
                "Group" | "Tube" => {}
                other => {
                    return Err(VesselError::format(format!("unsupported object type `{other}`")))
                }
            }
            let id: i64 = field(&fields, "ID")?.unwrap_or(0);
            let parent: i64 = field(&fields, "ParentID")?.unwrap_or(NO_PARENT);
            if id < 0 || id > u32::MAX as i64 {
                return Err(VesselError::format(format!("object id {id} out of range")));
            }

            if stack.is_empty() {
                if kind == "Group" && parent == NO_PARENT {
                    stack.push((id, TubeGroup::new(id as u32)));
                    continue;
                }
                stack.push((NO_PARENT, TubeGroup::new(0)));
            }
            close_until(&mut stack, parent)?;

            if kind == "Group" {
                stack.push((id, TubeGroup::new(id as u32)));
            } else {
                let n: usize = field(&fields, "NPoints")?.unwrap_or(0);
                let rows = (&mut lines).take(n).collect::<Vec<_>>();
                if rows.len() != n {
                    return Err(VesselError::format(format!(
                        "tube {id} declares {n} points, found {}",
                        rows.len()
                    )));
                }
                let tube = read_tube(id as u32, &fields, &rows)?;
                if let Some((_, top)) = stack.last_mut() {
                    top.push_tube(tube);
                }
            }
        }

        while stack.len() > 1 {
            close_top(&mut stack);
        }
        stack
            .pop()
            .map(|(_, g)| g)
            .ok_or_else(|| VesselError::format("file contains no group or tube"))
    }

    /// 读取 `.tre` 文件.
    pub fn open_tre<P: AsRef<Path>>(path: P) -> VesselResult<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|e| VesselError::io(path, e))?;
        Self::from_tre_str(&s)
    }
}

fn count_objects(g: &TubeGroup) -> usize {
    1 + g
        .children()
        .iter()
        .map(|c| match c {
            GroupChild::Tube(_) => 1,
            GroupChild::Group(sub) => count_objects(sub),
        })
        .sum::<usize>()
}

fn write_group(out: &mut String, g: &TubeGroup, parent: i64) {
    let _ = writeln!(
        out,
        "ObjectType = Group\nNDims = 3\nID = {}\nParentID = {parent}\nEndGroup = ",
        g.id()
    );
    for c in g.children() {
        match c {
            GroupChild::Tube(t) => write_tube(out, t, g.id() as i64),
            GroupChild::Group(sub) => write_group(out, sub, g.id() as i64),
        }
    }
}

fn write_tube(out: &mut String, t: &Tube, parent: i64) {
    let _ = writeln!(out, "ObjectType = Tube\nNDims = 3\nID = {}\nParentID = {parent}", t.id());
    let _ = writeln!(out, "Color = {}", join(&t.color()));
    out.push_str("TransformMatrix = 1 0 0 0 1 0 0 0 1\nOffset = 0 0 0\nCenterOfRotation = 0 0 0\n");
    out.push_str("ElementSpacing = 1 1 1\nRoot = False\nParentPoint = -1\n");
    let _ = writeln!(out, "PointDim = {}", POINT_DIM.join(" "));
    let _ = writeln!(out, "NPoints = {}\nPoints = ", t.len());
    for p in t.points() {
        let _ = writeln!(out, "{}", join(&point_row(p, t.id())));
    }
}

/// 关闭栈顶组, 挂到其父组下.
fn close_top(stack: &mut Vec<(i64, TubeGroup)>) {
    if let Some((_, g)) = stack.pop() {
        if let Some((_, parent)) = stack.last_mut() {
            parent.push_group(g);
        }
    }
}

/// 不断关闭栈顶组, 直到栈顶为 `parent`. 找不到时返回 `Err`.
fn close_until(stack: &mut Vec<(i64, TubeGroup)>, parent: i64) -> VesselResult<()> {
    loop {
        match stack.last().map(|(id, _)| *id) {
            Some(id) if id == parent => return Ok(()),
            Some(_) if stack.len() > 1 => close_top(stack),
            _ => {
                return Err(VesselError::format(format!("unknown parent group {parent}")));
            }
        }
    }
}

fn key_value(line: &str) -> VesselResult<(&str, &str)> {
    line.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| VesselError::format(format!("malformed line `{line}`")))
}

fn field<N: std::str::FromStr>(fields: &HashMap<&str, &str>, key: &str) -> VesselResult<Option<N>> {
    fields
        .get(key)
        .map(|v| {
            v.parse::<N>()
                .map_err(|_| VesselError::format(format!("cannot parse `{key} = {v}`")))
        })
        .transpose()
}

fn floats(s: &str) -> VesselResult<Vec<f64>> {
    s.split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| VesselError::format(format!("cannot parse numbers from `{s}`")))
}

fn read_tube(id: u32, fields: &HashMap<&str, &str>, rows: &[&str]) -> VesselResult<Tube> {
    let columns: Vec<&str> = fields
        .get("PointDim")
        .map_or_else(|| POINT_DIM.to_vec(), |s| s.split_whitespace().collect());
    let col = |name: &str| columns.iter().position(|c| *c == name);
    let (Some(cx), Some(cy), Some(cz)) = (col("x"), col("y"), col("z")) else {
        return Err(VesselError::format(format!("tube {id} has no x y z columns")));
    };

    if let Some(m) = fields.get("TransformMatrix") {
        if floats(m)? != [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0] {
            return Err(VesselError::format(format!("tube {id} is rotated")));
        }
    }
    let three = |key: &str, default: f64| -> VesselResult<Vector3<f64>> {
        match fields.get(key) {
            Some(s) => {
                let v = floats(s)?;
                if v.len() != 3 {
                    return Err(VesselError::format(format!("`{key}` needs 3 numbers")));
                }
                Ok(Vector3::new(v[0], v[1], v[2]))
            }
            None => Ok(Vector3::repeat(default)),
        }
    };
    let spacing = three("ElementSpacing", 1.0)?;
    let offset = three("Offset", 0.0)?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let v = floats(row)?;
        if v.len() != columns.len() {
            return Err(VesselError::format(format!(
                "tube {id}: expected {} columns, found {}",
                columns.len(),
                v.len()
            )));
        }
        let get = |name: &str| col(name).map(|i| v[i]);
        let vec3 = |a: &str, b: &str, c: &str| {
            Vector3::new(get(a).unwrap_or(0.0), get(b).unwrap_or(0.0), get(c).unwrap_or(0.0))
        };

        let local = Vector3::new(v[cx], v[cy], v[cz]);
        let position = Point3::from(local.component_mul(&spacing) + offset);
        let mut p = TubePoint::new(position, get("r").unwrap_or(1.0) * spacing.x);
        p.normal1 = vec3("v1x", "v1y", "v1z");
        p.normal2 = vec3("v2x", "v2y", "v2z");
        p.tangent = vec3("tx", "ty", "tz");
        for (k, name) in ["red", "green", "blue", "alpha"].iter().enumerate() {
            if let Some(c) = get(name) {
                p.color[k] = c;
            }
        }
        p.medialness = get("mness").unwrap_or(0.0);
        p.ridgeness = get("rn").unwrap_or(0.0);
        p.branchness = get("boundness").unwrap_or(0.0);
        p.curvature = get("curv").unwrap_or(0.0);
        p.levelness = get("levelness").unwrap_or(0.0);
        p.roundness = get("roundness").unwrap_or(0.0);
        p.intensity = get("intensity").unwrap_or(0.0);
        p.alpha = [
            get("a1").unwrap_or(0.0),
            get("a2").unwrap_or(0.0),
            get("a3").unwrap_or(0.0),
        ];
        points.push(p);
    }

    let mut tube = Tube::new(id, points);
    if let Some(c) = fields.get("Color") {
        let c = floats(c)?;
        if c.len() == 4 {
            tube.set_color([c[0], c[1], c[2], c[3]]);
        }
    }
    Ok(tube)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tube(id: u32, n: usize) -> Tube {
        let pts = (0..n)
            .map(|i| {
                let t = i as f64 * 0.1 + id as f64;
                let mut p = TubePoint::new(Point3::new(t.sin(), t.cos() / 3.0, t * 1e-7), 0.3 + t);
                p.tangent = Vector3::new(1.0 / 3.0, 0.0, -0.0);
                p.ridgeness = 0.1 * t;
                p.alpha = [-t, -t / 7.0, 1e-300];
                p.color = [0.25, 0.5, 0.75, 1.0];
                p
            })
            .collect();
        let mut t = Tube::new(id, pts);
        t.set_color([0.0, 1.0, 0.0, 0.5]);
        t
    }

    #[test]
    fn test_round_trip_nested() {
        let mut inner = TubeGroup::new(7);
        inner.push_tube(tube(3, 4));
        let mut root = TubeGroup::new(0);
        root.push_tube(tube(1, 5));
        root.push_group(inner);
        root.push_tube(tube(2, 1));
        root.push_group(TubeGroup::new(8));

        let text = root.to_tre_string();
        assert!(text.contains("NObjects = 6"));
        let back = TubeGroup::from_tre_str(&text).unwrap();
        assert_eq!(back, root);
    }

    #[test]
    fn test_tubes_without_group() {
        let text = "ObjectType = Tube\nID = 5\nParentID = -1\nElementSpacing = 2 2 2\n\
                    Offset = 1 0 0\nPointDim = x y z r\nNPoints = 2\nPoints =\n\
                    0 0 0 1\n1 0 0 1.5\n";
        let g = TubeGroup::from_tre_str(text).unwrap();
        assert_eq!(g.id(), 0);
        let t = g.tube(5).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.points()[1].position, Point3::new(3.0, 0.0, 0.0));
        assert_eq!(t.points()[1].radius, 3.0);
    }

    #[test]
    fn test_malformed() {
        let short = "ObjectType = Group\nID = 0\nParentID = -1\nObjectType = Tube\nID = 1\n\
                     ParentID = 0\nPointDim = x y z\nNPoints = 2\nPoints =\n0 0 0\n";
        assert!(matches!(
            TubeGroup::from_tre_str(short),
            Err(VesselError::Format { .. })
        ));
        let orphan = "ObjectType = Group\nID = 0\nParentID = -1\nObjectType = Tube\nID = 1\n\
                      ParentID = 9\nNPoints = 0\n";
        assert!(TubeGroup::from_tre_str(orphan).is_err());
        assert!(TubeGroup::from_tre_str("").is_err());
    }
}
