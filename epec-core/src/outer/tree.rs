//! Branching tree over complementarity encodings.
//!
//! Nodes live in a per-player arena and reference their parents by index,
//! so growth never invalidates references. The tree also owns the player's
//! known extreme points and rays and a cached membership LP used by the
//! separation oracle.

use crate::error::{EpecError, EpecResult};
use crate::numeric::contains_row_dense;
use epec_opt::{Env, Model, ObjSense, Sense, VarType};

/// One node of the branching tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Dense identifier, assigned in creation order.
    pub id: usize,
    /// Parent index; `None` for the root.
    pub parent: Option<usize>,
    /// Complementarities pinned along the root path.
    pub encoding: Vec<bool>,
    /// Bits still eligible for branching.
    pub allowed_branchings: Vec<bool>,
    /// Number of pinned bits, always `popcount(encoding)`.
    pub cumulative_branches: usize,
    /// Bits branched on when this node was created.
    pub id_comps: Vec<usize>,
}

/// Per-player branching tree with vertex/ray storage.
#[derive(Debug)]
pub struct OuterTree {
    nodes: Vec<Node>,
    encoding_size: usize,
    /// Known extreme points of the best-response set, one row each.
    v: Vec<Vec<f64>>,
    /// Known extreme rays, one row each.
    r: Vec<Vec<f64>>,
    pure: bool,
    feasible: bool,
    /// Cached membership LP and the (vertex, ray) counts it was built for.
    membership: Option<MembershipLp>,
}

#[derive(Debug)]
struct MembershipLp {
    model: Model,
    dim: usize,
    v_rows: Vec<usize>,
    built_v: usize,
    built_r: usize,
}

impl OuterTree {
    /// Create a tree with a root node over `encoding_size` complementarities.
    pub fn new(encoding_size: usize) -> Self {
        let root = Node {
            id: 0,
            parent: None,
            encoding: vec![false; encoding_size],
            allowed_branchings: vec![true; encoding_size],
            cumulative_branches: 0,
            id_comps: Vec::new(),
        };
        Self {
            nodes: vec![root],
            encoding_size,
            v: Vec::new(),
            r: Vec::new(),
            pure: false,
            feasible: false,
            membership: None,
        }
    }

    /// Number of complementarities.
    pub fn encoding_size(&self) -> usize {
        self.encoding_size
    }

    /// The root node's id.
    pub fn root(&self) -> usize {
        0
    }

    /// Number of nodes created so far.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Access a node.
    pub fn node(&self, id: usize) -> EpecResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| EpecError::OutOfRange(format!("node {} of {}", id, self.nodes.len())))
    }

    /// Create the single child of `node_id` obtained by pinning `id_comp`.
    ///
    /// Returns `None` (with a warning) when the bit is already pinned.
    pub fn single_branch(&mut self, id_comp: usize, node_id: usize) -> EpecResult<Option<usize>> {
        if id_comp >= self.encoding_size {
            return Err(EpecError::OutOfRange(format!(
                "complementarity {} of {}",
                id_comp, self.encoding_size
            )));
        }
        let parent = self.node(node_id)?;
        if parent.encoding[id_comp] {
            log::warn!(
                "complementarity {} already processed on node {}",
                id_comp,
                node_id
            );
            return Ok(None);
        }
        let mut child = parent.clone();
        child.id = self.nodes.len();
        child.parent = Some(node_id);
        child.encoding[id_comp] = true;
        child.allowed_branchings[id_comp] = false;
        child.cumulative_branches += 1;
        child.id_comps = vec![id_comp];
        let id = child.id;
        self.nodes.push(child);
        Ok(Some(id))
    }

    /// Bar a bit from further branching on a node, e.g. after its
    /// relaxation proved infeasible.
    pub fn deny_branching_location(&mut self, node_id: usize, location: usize) -> EpecResult<()> {
        if location >= self.encoding_size {
            return Err(EpecError::OutOfRange(format!(
                "complementarity {} of {}",
                location, self.encoding_size
            )));
        }
        let len = self.nodes.len();
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EpecError::OutOfRange(format!("node {} of {}", node_id, len)))?;
        if !node.allowed_branchings[location] {
            log::warn!("branching location {} was already denied", location);
        }
        node.allowed_branchings[location] = false;
        Ok(())
    }

    /// Known extreme points.
    pub fn vertices(&self) -> &[Vec<f64>] {
        &self.v
    }

    /// Known extreme rays.
    pub fn rays(&self) -> &[Vec<f64>] {
        &self.r
    }

    /// Record an extreme point. Returns false if a matching row is already
    /// stored (within `tol`).
    pub fn add_vertex(&mut self, vertex: &[f64], tol: f64) -> EpecResult<bool> {
        if let Some(first) = self.v.first() {
            if first.len() != vertex.len() {
                return Err(EpecError::OutOfRange(
                    "ill-dimensioned vertex".to_string(),
                ));
            }
        }
        if contains_row_dense(&self.v, vertex, tol) {
            return Ok(false);
        }
        self.v.push(vertex.to_vec());
        Ok(true)
    }

    /// Record an extreme ray, deduplicated like [`OuterTree::add_vertex`].
    pub fn add_ray(&mut self, ray: &[f64], tol: f64) -> EpecResult<bool> {
        if let Some(first) = self.r.first() {
            if first.len() != ray.len() {
                return Err(EpecError::OutOfRange("ill-dimensioned ray".to_string()));
            }
        }
        if contains_row_dense(&self.r, ray, tol) {
            return Ok(false);
        }
        self.r.push(ray.to_vec());
        Ok(true)
    }

    /// True if the player's strategy was certified feasible this iteration.
    pub fn feasible(&self) -> bool {
        self.feasible
    }

    /// True if the certificate had single-vertex support.
    pub fn pure(&self) -> bool {
        self.pure
    }

    /// Mark the player feasible.
    pub fn set_feasible(&mut self) {
        self.feasible = true;
    }

    /// Mark the certificate pure.
    pub fn set_pure(&mut self) {
        self.pure = true;
    }

    /// Clear the per-iteration feasibility marks.
    pub fn reset_feasibility(&mut self) {
        self.feasible = false;
        self.pure = false;
    }

    /// Refresh the cached membership LP for the point `x` and return it
    /// with the vertex-row indices (for reading the support from duals).
    ///
    /// The normalized dual membership LP over V and R is
    ///
    /// ```text
    /// max  y^T x - y0
    /// s.t. y^T v - y0 <= 0   for every vertex v
    ///      y^T r      <= 0   for every ray r
    ///      -1 <= y_j <= 1
    /// ```
    ///
    /// whose optimum is 0 iff `x` lies in conv(V) + cone(R); otherwise the
    /// maximizer `y` is a separating direction.
    pub fn update_membership(&mut self, env: &Env, x: &[f64]) -> EpecResult<(&Model, &[usize])> {
        let dim = x.len();
        let rebuild = match &self.membership {
            Some(m) => m.dim != dim,
            None => true,
        };
        if rebuild {
            let mut model = env.model();
            for _ in 0..dim {
                model.add_var(-1.0, 1.0, 0.0, VarType::Continuous);
            }
            model.add_var(f64::NEG_INFINITY, f64::INFINITY, 0.0, VarType::Continuous);
            self.membership = Some(MembershipLp {
                model,
                dim,
                v_rows: Vec::new(),
                built_v: 0,
                built_r: 0,
            });
        }
        let mem = self.membership.as_mut().ok_or_else(|| {
            EpecError::Assertion("membership cache just initialized".to_string())
        })?;
        for v in &self.v[mem.built_v..] {
            if v.len() != dim {
                return Err(EpecError::OutOfRange(
                    "vertex dimension mismatch in membership update".to_string(),
                ));
            }
            let mut coefs: Vec<(usize, f64)> = v
                .iter()
                .enumerate()
                .filter(|(_, c)| **c != 0.0)
                .map(|(j, c)| (j, *c))
                .collect();
            coefs.push((dim, -1.0));
            let row = mem.model.add_constr(&coefs, Sense::Less, 0.0);
            mem.v_rows.push(row);
        }
        mem.built_v = self.v.len();
        for r in &self.r[mem.built_r..] {
            let coefs: Vec<(usize, f64)> = r
                .iter()
                .enumerate()
                .filter(|(_, c)| **c != 0.0)
                .map(|(j, c)| (j, *c))
                .collect();
            mem.model.add_constr(&coefs, Sense::Less, 0.0);
        }
        mem.built_r = self.r.len();

        let mut obj: Vec<(usize, f64)> = x
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .map(|(j, c)| (j, *c))
            .collect();
        obj.push((dim, -1.0));
        mem.model.set_objective(&obj, ObjSense::Maximize);
        Ok((&mem.model, &mem.v_rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_branching() {
        let mut tree = OuterTree::new(3);
        let root = tree.root();
        assert_eq!(tree.node(root).unwrap().cumulative_branches, 0);

        let child = tree.single_branch(1, root).unwrap().unwrap();
        let node = tree.node(child).unwrap();
        assert_eq!(node.id, 1);
        assert_eq!(node.parent, Some(root));
        assert_eq!(node.encoding, vec![false, true, false]);
        assert_eq!(node.allowed_branchings, vec![true, false, true]);
        assert_eq!(node.cumulative_branches, 1);

        // Pinned bits cannot be branched again.
        assert!(tree.single_branch(1, child).unwrap().is_none());
    }

    #[test]
    fn test_popcount_invariant_along_path() {
        let mut tree = OuterTree::new(4);
        let mut id = tree.root();
        for bit in [2usize, 0, 3] {
            id = tree.single_branch(bit, id).unwrap().unwrap();
            let node = tree.node(id).unwrap();
            let pop = node.encoding.iter().filter(|&&b| b).count();
            assert_eq!(pop, node.cumulative_branches);
            for (i, &set) in node.encoding.iter().enumerate() {
                if set {
                    assert!(!node.allowed_branchings[i]);
                }
            }
        }
    }

    #[test]
    fn test_branch_out_of_range() {
        let mut tree = OuterTree::new(2);
        assert!(matches!(
            tree.single_branch(2, 0),
            Err(EpecError::OutOfRange(_))
        ));
        assert!(matches!(
            tree.deny_branching_location(0, 9),
            Err(EpecError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_vertex_and_ray_dedup() {
        let mut tree = OuterTree::new(1);
        assert!(tree.add_vertex(&[0.0, 1.0], 1e-6).unwrap());
        assert!(!tree.add_vertex(&[0.0, 1.0 + 1e-8], 1e-6).unwrap());
        assert!(tree.add_vertex(&[1.0, 0.0], 1e-6).unwrap());
        assert_eq!(tree.vertices().len(), 2);
        assert!(matches!(
            tree.add_vertex(&[1.0], 1e-6),
            Err(EpecError::OutOfRange(_))
        ));

        assert!(tree.add_ray(&[1.0, 1.0], 1e-6).unwrap());
        assert!(!tree.add_ray(&[1.0, 1.0], 1e-6).unwrap());
    }

    #[test]
    fn test_membership_certifies_convex_combination() {
        let env = Env::new();
        let mut tree = OuterTree::new(1);
        tree.add_vertex(&[0.0, 0.0], 1e-6).unwrap();
        tree.add_vertex(&[1.0, 0.0], 1e-6).unwrap();
        tree.add_vertex(&[0.0, 1.0], 1e-6).unwrap();

        // The centroid is inside: optimum 0 with all directions zero.
        let (model, _) = tree.update_membership(&env, &[0.25, 0.25]).unwrap();
        let sol = model.optimize().unwrap();
        assert_eq!(sol.status, epec_opt::Status::Optimal);
        assert!(sol.obj.abs() < 1e-7, "objective = {}", sol.obj);

        // A point outside yields a positive optimum.
        let (model, _) = tree.update_membership(&env, &[2.0, 0.0]).unwrap();
        let sol = model.optimize().unwrap();
        assert!(sol.obj > 0.5, "objective = {}", sol.obj);
    }

    #[test]
    fn test_membership_rays_open_the_cone() {
        let env = Env::new();
        let mut tree = OuterTree::new(1);
        tree.add_vertex(&[0.0, 0.0], 1e-6).unwrap();
        // Without the ray, (3, 0) is outside.
        let (model, _) = tree.update_membership(&env, &[3.0, 0.0]).unwrap();
        let sol = model.optimize().unwrap();
        assert!(sol.obj > 1e-3);
        // Adding the ray (1, 0) puts it in the cone.
        tree.add_ray(&[1.0, 0.0], 1e-6).unwrap();
        let (model, _) = tree.update_membership(&env, &[3.0, 0.0]).unwrap();
        let sol = model.optimize().unwrap();
        assert!(sol.obj.abs() < 1e-7, "objective = {}", sol.obj);
    }
}
