//! # Generic instantiation cache
//!
//! Monomorphizes generic function templates. Each `(template, concrete type
//! tuple)` key is lowered at most once; concurrent requests for the same key
//! block on the key's slot until the single writer has finished, then reuse
//! its body.
//!
//! The whole-module driver runs a worklist fixpoint over the call graph: lower
//! every non-generic function, collect the instantiations their bodies call,
//! lower those, and so on until no new key appears. Each instantiation records
//! the chain of symbols that led to it; a chain longer than the configured
//! depth is a fatal error, which turns an unbounded expansion such as
//! `nest<T>` calling `nest<*T>` into a diagnostic instead of a hang.

use super::ast::{FunctionDecl, Module};
use super::ir::{Callee, IrFunction, IrGenerator, IrInstruction, LoweringContext};
use super::types::Type;
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Structured cache key; never parsed back from a mangled string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub template: String,
    pub type_args: Vec<Type>,
}

impl InstanceKey {
    pub fn new(template: impl Into<String>, type_args: Vec<Type>) -> Self {
        Self {
            template: template.into(),
            type_args,
        }
    }

    /// `template$t1$t2`
    pub fn mangled(&self) -> String {
        let mut out = self.template.clone();
        for t in &self.type_args {
            out.push('$');
            out.push_str(&t.short_name());
        }
        out
    }
}

type Slot = Arc<Mutex<Option<Arc<IrFunction>>>>;

/// Thread-safe single-writer-wins cache of monomorphized bodies
#[derive(Debug, Default)]
pub struct InstantiationCache {
    slots: DashMap<InstanceKey, Slot>,
    lowered: AtomicUsize,
}

impl InstantiationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the body cached under `key`, lowering it with `lower` if this
    /// is the first request. The flag is true for the caller that lowered it.
    pub fn get_or_lower<F>(&self, key: &InstanceKey, lower: F) -> Result<(Arc<IrFunction>, bool)>
    where
        F: FnOnce() -> Result<IrFunction>,
    {
        // Clone the slot out so the shard lock is released before we block.
        let slot: Slot = self.slots.entry(key.clone()).or_default().value().clone();
        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok((Arc::clone(existing), false));
        }
        let body = Arc::new(lower()?);
        *guard = Some(Arc::clone(&body));
        self.lowered.fetch_add(1, Ordering::Relaxed);
        debug!(instance = %key.mangled(), "lowered instantiation");
        Ok((body, true))
    }

    pub fn get(&self, key: &InstanceKey) -> Option<Arc<IrFunction>> {
        let slot = self.slots.get(key)?.value().clone();
        let guard = slot.lock();
        guard.clone()
    }

    /// Number of bodies actually lowered
    pub fn lowered_count(&self) -> usize {
        self.lowered.load(Ordering::Relaxed)
    }
}

/// Instantiations a lowered body calls, in first-use order
pub fn instance_keys(func: &IrFunction) -> Vec<InstanceKey> {
    let mut keys: Vec<InstanceKey> = Vec::new();
    for instr in &func.instructions {
        if let IrInstruction::Call(_, Callee::Function(sym), _) = instr {
            if sym.type_args.is_empty() {
                continue;
            }
            let key = InstanceKey::new(sym.name.clone(), sym.type_args.clone());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Outcome of lowering a whole module
#[derive(Debug, Default)]
pub struct LoweredModule {
    /// Non-generic functions in declaration order, then instantiations in
    /// discovery order
    pub functions: Vec<IrFunction>,
    /// Number of instantiations among `functions`
    pub instances: usize,
    /// Function-local lowering failures
    pub errors: Vec<Error>,
}

/// Worklist driver over the module's call graph
pub struct Instantiator<'a> {
    ctx: LoweringContext<'a>,
    module: &'a Module,
    templates: HashMap<&'a str, &'a FunctionDecl>,
    cache: InstantiationCache,
    max_depth: usize,
}

impl<'a> Instantiator<'a> {
    pub fn new(ctx: LoweringContext<'a>, module: &'a Module, max_depth: usize) -> Self {
        let templates = module
            .functions
            .iter()
            .filter(|f| f.is_template())
            .map(|f| (f.name.as_str(), f))
            .collect();
        Self {
            ctx,
            module,
            templates,
            cache: InstantiationCache::new(),
            max_depth,
        }
    }

    pub fn cache(&self) -> &InstantiationCache {
        &self.cache
    }

    /// Lower one instantiation (or fetch it from the cache)
    pub fn instantiate(&self, template: &FunctionDecl, type_args: &[Type]) -> Result<Arc<IrFunction>> {
        let key = InstanceKey::new(template.name.clone(), type_args.to_vec());
        let ctx = self.ctx;
        self.cache
            .get_or_lower(&key, || IrGenerator::new(ctx, template, type_args).generate())
            .map(|(f, _)| f)
    }

    /// Lower every reachable function. Only an instantiation-limit error
    /// aborts; other failures are collected per function.
    pub fn run(&self) -> Result<LoweredModule> {
        let ctx = self.ctx;
        let roots: Vec<&FunctionDecl> = self
            .module
            .functions
            .iter()
            .filter(|f| !f.is_template())
            .collect();

        let lowered: Vec<Result<IrFunction>> = roots
            .par_iter()
            .map(|decl| IrGenerator::new(ctx, decl, &[]).generate())
            .collect();

        let mut out = LoweredModule::default();
        let mut frontier: Vec<(InstanceKey, Vec<String>)> = Vec::new();
        for result in lowered {
            match result {
                Ok(func) => {
                    let chain = vec![func.symbol.mangled()];
                    frontier.extend(instance_keys(&func).into_iter().map(|k| (k, chain.clone())));
                    out.functions.push(func);
                }
                Err(e) => out.errors.push(e),
            }
        }

        let mut seen: HashSet<InstanceKey> = HashSet::new();
        while !frontier.is_empty() {
            let wave: Vec<(InstanceKey, Vec<String>)> = frontier
                .drain(..)
                .filter(|(k, _)| seen.insert(k.clone()))
                .collect();

            for (key, chain) in &wave {
                if chain.len() > self.max_depth {
                    let mut chain = chain.clone();
                    chain.push(key.mangled());
                    return Err(Error::InstantiationLimit {
                        template: key.template.clone(),
                        depth: self.max_depth,
                        chain,
                    });
                }
            }

            let results: Vec<(Result<Arc<IrFunction>>, &Vec<String>)> = wave
                .par_iter()
                .map(|(key, chain)| {
                    let result = match self.templates.get(key.template.as_str()) {
                        Some(template) => self.instantiate(template, &key.type_args),
                        None => Err(Error::UnresolvedName {
                            function: chain.last().cloned().unwrap_or_default(),
                            line: 0,
                            column: 0,
                            kind: "generic function",
                            name: key.template.clone(),
                        }),
                    };
                    (result, chain)
                })
                .collect();

            for (result, chain) in results {
                match result {
                    Ok(func) => {
                        let mut next_chain = chain.clone();
                        next_chain.push(func.symbol.mangled());
                        frontier.extend(
                            instance_keys(&func)
                                .into_iter()
                                .map(|k| (k, next_chain.clone())),
                        );
                        out.functions.push(func.as_ref().clone());
                        out.instances += 1;
                    }
                    Err(e) => out.errors.push(e),
                }
            }
        }

        info!(
            module = %self.module.name,
            functions = out.functions.len(),
            instances = out.instances,
            "lowered module"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::*;
    use crate::compiler::ir::StringPool;

    fn identity_template() -> FunctionDecl {
        FunctionDecl::new(
            "id",
            vec![("x", TypeRef::Param(0))],
            TypeRef::Param(0),
            vec![ret(local("x", TypeRef::Param(0)))],
        )
        .generic(&["T"])
    }

    #[test]
    fn test_concurrent_requests_lower_once() {
        let template = identity_template();
        let module = Module::new("m").with_function(template.clone());
        let strings = StringPool::new();
        let ctx = LoweringContext {
            module: "m",
            globals: &[],
            strings: &strings,
        };
        let inst = Instantiator::new(ctx, &module, 8);

        let bodies: Vec<Arc<IrFunction>> = (0..32)
            .into_par_iter()
            .map(|_| inst.instantiate(&template, &[Type::U16]).unwrap())
            .collect();

        assert_eq!(inst.cache().lowered_count(), 1);
        assert!(bodies.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(bodies[0].symbol.mangled(), "id$u16");
    }

    #[test]
    fn test_distinct_tuples_get_distinct_bodies() {
        let cache = InstantiationCache::new();
        let mk = |ty: Type| {
            let key = InstanceKey::new("id", vec![ty.clone()]);
            cache
                .get_or_lower(&key, || {
                    Ok(IrFunction::new(
                        crate::compiler::ir::Symbol::new("m", "id", vec![ty]),
                        Type::Void,
                    ))
                })
                .unwrap()
        };
        assert!(mk(Type::U8).1);
        assert!(mk(Type::U16).1);
        assert!(!mk(Type::U8).1);
        assert_eq!(cache.lowered_count(), 2);
    }

    #[test]
    fn test_failed_lowering_leaves_slot_empty() {
        let cache = InstantiationCache::new();
        let key = InstanceKey::new("bad", vec![Type::U8]);
        assert!(cache
            .get_or_lower(&key, || Err(Error::runtime("boom")))
            .is_err());
        assert!(cache.get(&key).is_none());
    }
}
