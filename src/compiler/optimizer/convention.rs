//! Calling-convention assignment
//!
//! Decides, after tail-call conversion, which functions are emitted with the
//! self-modifying (SMC) convention. SMC is non-reentrant, so a function that
//! can still be re-entered while active (a remaining self call, or a cycle
//! through other functions) never gets it: an explicit SMC request on such a
//! function is a convention conflict, an automatic one is simply declined.

use crate::compiler::ir::{
    Callee, CallingConvention, ConventionRequest, IrInstruction, IrProgram, Symbol,
};
use crate::compiler::target::TargetDescriptor;
use crate::Error;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// How a function can be re-entered while it is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recursion {
    None,
    /// Calls itself directly
    Direct,
    /// Part of a cycle through other functions; the path starts and ends
    /// at the function
    Mutual(Vec<Symbol>),
}

/// Direct call edges between the program's functions
#[derive(Debug, Default)]
pub struct CallGraph {
    edges: BTreeMap<Symbol, BTreeSet<Symbol>>,
}

impl CallGraph {
    pub fn build(program: &IrProgram) -> Self {
        let mut edges: BTreeMap<Symbol, BTreeSet<Symbol>> = BTreeMap::new();
        for func in &program.functions {
            let callees = func
                .instructions
                .iter()
                .filter_map(|i| match i {
                    IrInstruction::Call(_, Callee::Function(sym), _) => Some(sym.clone()),
                    _ => None,
                })
                .collect();
            edges.insert(func.symbol.clone(), callees);
        }
        Self { edges }
    }

    pub fn callees(&self, sym: &Symbol) -> impl Iterator<Item = &Symbol> {
        self.edges.get(sym).into_iter().flatten()
    }

    /// Classify how `sym` can reach itself
    pub fn recursion(&self, sym: &Symbol) -> Recursion {
        if self.callees(sym).any(|c| c == sym) {
            return Recursion::Direct;
        }
        // Depth-first search for a path back to `sym`, keeping parents.
        let mut parent: BTreeMap<&Symbol, &Symbol> = BTreeMap::new();
        let mut stack: Vec<&Symbol> = vec![sym];
        let mut visited: BTreeSet<&Symbol> = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for next in self.callees(node) {
                if next == sym {
                    let mut path = vec![node.clone()];
                    let mut cur = node;
                    while let Some(up) = parent.get(cur) {
                        cur = *up;
                        path.push(cur.clone());
                    }
                    path.reverse();
                    path.push(sym.clone());
                    return Recursion::Mutual(path);
                }
                if !visited.contains(next) {
                    parent.entry(next).or_insert(node);
                    stack.push(next);
                }
            }
        }
        Recursion::None
    }
}

/// Resolve every function's convention for `target`. Conflicts are returned
/// per function; the functions involved keep the stack convention.
pub fn assign_conventions(
    program: &mut IrProgram,
    target: &TargetDescriptor,
    smc_by_default: bool,
) -> Vec<Error> {
    let graph = CallGraph::build(program);
    let mut errors = Vec::new();

    for func in &mut program.functions {
        let recursion = graph.recursion(&func.symbol);
        func.convention = match func.requested_convention {
            ConventionRequest::Stack => CallingConvention::Stack,
            ConventionRequest::Smc => match &recursion {
                Recursion::None => CallingConvention::Smc,
                Recursion::Direct => {
                    errors.push(Error::ConventionConflict {
                        function: func.name(),
                        reason: "self-recursive call remains after tail-call conversion".into(),
                    });
                    CallingConvention::Stack
                }
                Recursion::Mutual(cycle) => {
                    let path: Vec<String> = cycle.iter().map(Symbol::qualified).collect();
                    errors.push(Error::ConventionConflict {
                        function: func.name(),
                        reason: format!("reentrant through call cycle {}", path.join(" -> ")),
                    });
                    CallingConvention::Stack
                }
            },
            ConventionRequest::Auto => {
                if smc_by_default && target.supports_smc && recursion == Recursion::None {
                    CallingConvention::Smc
                } else {
                    CallingConvention::Stack
                }
            }
        };
        debug!(function = %func.name(), convention = ?func.convention, "assigned calling convention");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::IrFunction;
    use crate::compiler::target::Target;
    use crate::compiler::types::Type;

    fn func(name: &str, calls: &[&str]) -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", name, vec![]), Type::Void);
        for c in calls {
            f.instructions.push(IrInstruction::Call(
                None,
                Callee::Function(Symbol::new("m", *c, vec![])),
                vec![],
            ));
        }
        f.instructions.push(IrInstruction::Return(None));
        f
    }

    fn program(funcs: Vec<IrFunction>) -> IrProgram {
        let mut p = IrProgram::new("m");
        p.functions = funcs;
        p
    }

    #[test]
    fn test_recursion_classes() {
        let p = program(vec![
            func("a", &["b"]),
            func("b", &["c"]),
            func("c", &["a"]),
            func("d", &["d"]),
            func("e", &["a"]),
        ]);
        let g = CallGraph::build(&p);
        let sym = |n: &str| Symbol::new("m", n, vec![]);
        assert_eq!(g.recursion(&sym("d")), Recursion::Direct);
        assert_eq!(g.recursion(&sym("e")), Recursion::None);
        assert_eq!(
            g.recursion(&sym("a")),
            Recursion::Mutual(vec![sym("a"), sym("b"), sym("c"), sym("a")])
        );
    }

    #[test]
    fn test_smc_request_on_recursive_function_conflicts() {
        let mut d = func("d", &["d"]);
        d.requested_convention = ConventionRequest::Smc;
        let mut leaf = func("leaf", &[]);
        leaf.requested_convention = ConventionRequest::Smc;
        let mut p = program(vec![d, leaf]);

        let errors = assign_conventions(&mut p, Target::Z80Smc.descriptor(), false);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::ConventionConflict { function, .. } if function == "m_d"));
        assert_eq!(p.functions[0].convention, CallingConvention::Stack);
        assert_eq!(p.functions[1].convention, CallingConvention::Smc);
    }

    #[test]
    fn test_auto_only_upgrades_on_smc_targets() {
        let mut p = program(vec![func("leaf", &[]), func("self_rec", &["self_rec"])]);
        assign_conventions(&mut p, Target::Z80Smc.descriptor(), true);
        assert_eq!(p.functions[0].convention, CallingConvention::Smc);
        assert_eq!(p.functions[1].convention, CallingConvention::Stack);

        assign_conventions(&mut p, Target::Mos6502.descriptor(), true);
        assert_eq!(p.functions[0].convention, CallingConvention::Stack);
    }
}
