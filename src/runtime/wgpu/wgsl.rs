//! WGSL sources of the general simplex kernels
//!
//! One module per entry point. Storage buffers are bound in argument order
//! starting at binding 0; the scalar arguments follow in a uniform block as
//! packed `u32` words (floats are bitcast). The workgroup size is baked into
//! each module, so a source is generated per `(entry, local size)`.

use crate::runtime::kernels as names;

/// Element type of a storage binding
#[derive(Clone, Copy)]
enum Elem {
    F32,
    U32,
    AtomicU32,
}

impl Elem {
    fn wgsl(self) -> &'static str {
        match self {
            Elem::F32 => "f32",
            Elem::U32 => "u32",
            Elem::AtomicU32 => "atomic<u32>",
        }
    }
}

use Elem::{AtomicU32, F32, U32};

/// Largest scalar argument count of any entry point, rounded to whole vec4s
pub(crate) const PARAM_WORDS: usize = 8;

const PARAMS: &str = r#"
struct Params {
    v: array<vec4<u32>, 2>,
}

fn param(i: u32) -> u32 {
    return params.v[i / 4u][i % 4u];
}
"#;

const BOUND_HELPERS: &str = r#"
fn has_lower(v: u32) -> bool {
    return (bounded[v] & 1u) != 0u;
}

fn has_upper(v: u32) -> bool {
    return (bounded[v] & 2u) != 0u;
}
"#;

const TREE_REDUCE: &str = r#"
var<workgroup> shared_sums: array<f32, WG_X>;

fn tree_reduce(lid: u32, value: f32) -> f32 {
    shared_sums[lid] = value;
    workgroupBarrier();
    for (var stride = WG_X / 2u; stride > 0u; stride = stride / 2u) {
        if (lid < stride) {
            shared_sums[lid] = shared_sums[lid] + shared_sums[lid + stride];
        }
        workgroupBarrier();
    }
    return shared_sums[0];
}
"#;

const CHECK_BOUNDS: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn check_bounds(@builtin(global_invocation_id) gid: vec3<u32>) {
    let num_vars = param(0u);
    let v = param(1u) + gid.x;
    let eps = bitcast<f32>(param(2u));
    if (v >= num_vars || flags[v] != 1u) {
        return;
    }
    let a = assigns[v];
    if (has_lower(v) && abs(a - lower[v]) < eps) {
        return;
    }
    if (has_upper(v) && abs(a - upper[v]) < eps) {
        return;
    }
    if ((has_lower(v) && a < lower[v]) || (has_upper(v) && a > upper[v])) {
        atomicMin(&output[0], v);
    }
}
"#;

const FIND_SUITABLE: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn find_suitable(@builtin(global_invocation_id) gid: vec3<u32>) {
    let num_vars = param(0u);
    let num_cols = param(1u);
    let broken = param(2u);
    let v = param(3u) + gid.x;
    if (v >= num_vars || flags[v] != 0u) {
        return;
    }
    let increase = has_lower(broken) && assigns[broken] < lower[broken];
    let coeff = tableau[var_to_tableau[broken] * num_cols + var_to_tableau[v]];
    let a = assigns[v];
    let inc = !has_upper(v) || a < upper[v];
    let dec = !has_lower(v) || a > lower[v];
    var ok = false;
    if (increase) {
        ok = (inc && coeff > 0.0) || (dec && coeff < 0.0);
    } else {
        ok = (inc && coeff < 0.0) || (dec && coeff > 0.0);
    }
    if (ok) {
        atomicMin(&output[0], v);
    }
}
"#;

const FIND_SUITABLE_COMPLETE: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn find_suitable_complete(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x != 0u || gid.y != 0u) {
        return;
    }
    let num_cols = param(0u);
    let broken = param(1u);
    let suitable = param(2u);
    let a = assigns[broken];
    let increase = has_lower(broken) && a < lower[broken];
    var delta = 0.0;
    if (increase) {
        delta = lower[broken] - a;
    } else if (has_upper(broken)) {
        delta = a - upper[broken];
    }
    let coeff = tableau[var_to_tableau[broken] * num_cols + var_to_tableau[suitable]];
    let theta = delta / coeff;
    if (increase) {
        assigns[suitable] = assigns[suitable] + theta;
        assigns[broken] = a + delta;
    } else {
        assigns[suitable] = assigns[suitable] - theta;
        assigns[broken] = a - delta;
    }
}
"#;

const PIVOT_UPDATE_INNER: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn pivot_update_inner(@builtin(global_invocation_id) gid: vec3<u32>) {
    let alpha = bitcast<f32>(param(0u));
    let row = param(1u);
    let col = param(2u);
    let num_rows = param(3u);
    let num_cols = param(4u);
    let c = gid.x;
    let r = gid.y;
    if (r >= num_rows || c >= num_cols || r == row || c == col) {
        return;
    }
    let beta = tableau[row * num_cols + c];
    let gamma = tableau[r * num_cols + col];
    let i = r * num_cols + c;
    tableau[i] = tableau[i] - (beta * gamma) / alpha;
}
"#;

const PIVOT_UPDATE_ROW: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn pivot_update_row(@builtin(global_invocation_id) gid: vec3<u32>) {
    let alpha = bitcast<f32>(param(0u));
    let row = param(1u);
    let col = param(2u);
    let num_cols = param(3u);
    let c = gid.x;
    if (c >= num_cols || c == col) {
        return;
    }
    let i = row * num_cols + c;
    tableau[i] = -tableau[i] / alpha;
}
"#;

const PIVOT_UPDATE_COLUMN: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn pivot_update_column(@builtin(global_invocation_id) gid: vec3<u32>) {
    let alpha = bitcast<f32>(param(0u));
    let row = param(1u);
    let col = param(2u);
    let num_rows = param(3u);
    let num_cols = param(4u);
    let r = gid.x;
    if (r >= num_rows || r == row) {
        return;
    }
    let i = r * num_cols + col;
    tableau[i] = tableau[i] / alpha;
}
"#;

const UPDATE_ASSIGNMENT: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn update_assignment(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let num_cols = param(0u);
    let row = param(1u);
    let c = gid.x;
    var value = 0.0;
    if (c < num_cols) {
        value = assigns[col_to_var[c]] * tableau[row * num_cols + c];
    }
    let sum = tree_reduce(lid.x, value);
    if (lid.x == 0u) {
        partials_out[wid.x] = sum;
    }
}
"#;

const REDUCE_PARTIAL_SUMS: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn reduce_partial_sums(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let count = param(0u);
    var value = 0.0;
    if (gid.x < count) {
        value = partials_in[gid.x];
    }
    let sum = tree_reduce(lid.x, value);
    if (lid.x == 0u) {
        partials_out[wid.x] = sum;
    }
}
"#;

const UPDATE_ASSIGNMENT_COMPLETE: &str = r#"
@compute @workgroup_size(WG_X, WG_Y)
fn update_assignment_complete(@builtin(local_invocation_id) lid: vec3<u32>) {
    let count = param(0u);
    let var_index = param(1u);
    var value = 0.0;
    if (lid.x < count) {
        value = partials_in[lid.x];
    }
    let sum = tree_reduce(lid.x, value);
    if (lid.x == 0u) {
        assigns[var_index] = sum;
    }
}
"#;

struct Layout {
    bindings: &'static [(&'static str, Elem)],
    body: &'static str,
    bounds: bool,
    reduce: bool,
}

fn layout(entry: &str) -> Option<Layout> {
    let layout = match entry {
        names::CHECK_BOUNDS => Layout {
            bindings: &[
                ("lower", F32),
                ("upper", F32),
                ("bounded", U32),
                ("assigns", F32),
                ("flags", U32),
                ("output", AtomicU32),
            ],
            body: CHECK_BOUNDS,
            bounds: true,
            reduce: false,
        },
        names::FIND_SUITABLE => Layout {
            bindings: &[
                ("tableau", F32),
                ("lower", F32),
                ("upper", F32),
                ("bounded", U32),
                ("assigns", F32),
                ("flags", U32),
                ("var_to_tableau", U32),
                ("output", AtomicU32),
            ],
            body: FIND_SUITABLE,
            bounds: true,
            reduce: false,
        },
        names::FIND_SUITABLE_COMPLETE => Layout {
            bindings: &[
                ("tableau", F32),
                ("lower", F32),
                ("upper", F32),
                ("bounded", U32),
                ("assigns", F32),
                ("var_to_tableau", U32),
            ],
            body: FIND_SUITABLE_COMPLETE,
            bounds: true,
            reduce: false,
        },
        names::PIVOT_UPDATE_INNER => Layout {
            bindings: &[("tableau", F32)],
            body: PIVOT_UPDATE_INNER,
            bounds: false,
            reduce: false,
        },
        names::PIVOT_UPDATE_ROW => Layout {
            bindings: &[("tableau", F32)],
            body: PIVOT_UPDATE_ROW,
            bounds: false,
            reduce: false,
        },
        names::PIVOT_UPDATE_COLUMN => Layout {
            bindings: &[("tableau", F32)],
            body: PIVOT_UPDATE_COLUMN,
            bounds: false,
            reduce: false,
        },
        names::UPDATE_ASSIGNMENT => Layout {
            bindings: &[
                ("tableau", F32),
                ("assigns", F32),
                ("col_to_var", U32),
                ("partials_out", F32),
            ],
            body: UPDATE_ASSIGNMENT,
            bounds: false,
            reduce: true,
        },
        names::REDUCE_PARTIAL_SUMS => Layout {
            bindings: &[("partials_in", F32), ("partials_out", F32)],
            body: REDUCE_PARTIAL_SUMS,
            bounds: false,
            reduce: true,
        },
        names::UPDATE_ASSIGNMENT_COMPLETE => Layout {
            bindings: &[("partials_in", F32), ("assigns", F32)],
            body: UPDATE_ASSIGNMENT_COMPLETE,
            bounds: false,
            reduce: true,
        },
        _ => return None,
    };
    Some(layout)
}

/// Whether `entry` is an entry point of the WGSL source
pub(crate) fn has_entry(entry: &str) -> bool {
    layout(entry).is_some()
}

/// Number of storage buffers `entry` binds
pub(crate) fn storage_bindings(entry: &str) -> Option<usize> {
    layout(entry).map(|l| l.bindings.len())
}

/// Generate the module for `entry` with workgroup size `(x, y)`
pub(crate) fn module_source(entry: &str, local_x: u32, local_y: u32) -> Option<String> {
    let layout = layout(entry)?;
    let mut src = String::new();
    src.push_str(&format!(
        "const WG_X: u32 = {local_x}u;\nconst WG_Y: u32 = {local_y}u;\n\n"
    ));
    for (i, (name, elem)) in layout.bindings.iter().enumerate() {
        src.push_str(&format!(
            "@group(0) @binding({i}) var<storage, read_write> {name}: array<{}>;\n",
            elem.wgsl()
        ));
    }
    src.push_str(&format!(
        "@group(0) @binding({}) var<uniform> params: Params;\n",
        layout.bindings.len()
    ));
    src.push_str(PARAMS);
    if layout.bounds {
        src.push_str(BOUND_HELPERS);
    }
    if layout.reduce {
        src.push_str(TREE_REDUCE);
    }
    src.push_str(layout.body);
    Some(src)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kernel_has_a_module() {
        for entry in names::ALL_KERNELS {
            let src = module_source(entry, 64, 1).unwrap();
            assert!(src.contains(&format!("fn {entry}(")), "{entry}");
            assert_eq!(storage_bindings(entry), names::buffer_count(entry));
        }
        assert!(!has_entry("missing"));
    }

    #[test]
    fn test_params_follow_storage() {
        let src = module_source(names::PIVOT_UPDATE_ROW, 16, 1).unwrap();
        assert!(src.contains("@binding(1) var<uniform> params"));
        assert!(src.contains("const WG_X: u32 = 16u;"));
        assert!(!src.contains("shared_sums"));
    }

    #[test]
    fn test_scalar_words_fit_params() {
        for entry in names::ALL_KERNELS {
            assert!(names::scalar_count(entry).unwrap() <= PARAM_WORDS);
        }
    }
}
