//! Operation-set definition macro.

/// Declare an operation enum and wire its dispatch into [`Op`](crate::Op).
///
/// Variants carry the generated arguments; structural equality and hashing
/// are derived, which is what the search's visited table keys on. The
/// `apply` block is required; `check` and `update` fall back to the trait
/// defaults (accept everything, leave the model unchanged). A provided
/// `check` body is wrapped so the step is accepted only when the body
/// returns true *and* no event captured by the checker is a failure. An
/// optional `gen` block adds an associated `gen_args` strategy
/// constructor taking the trial context.
///
/// ```
/// use carly::define_ops;
/// use carly::proptest::prelude::*;
/// use std::collections::BTreeMap;
/// use std::sync::Mutex;
///
/// #[derive(Debug, Default)]
/// pub struct Store(Mutex<BTreeMap<u8, u8>>);
///
/// define_ops! {
///     /// Operations on the store.
///     pub enum StoreOp {
///         Put { key: u8, value: u8 },
///         Get { key: u8 },
///     }
///     system: Store;
///     model: BTreeMap<u8, u8>;
///     outcome: Option<u8>;
///     apply(op, system) {
///         match op {
///             StoreOp::Put { key, value } => {
///                 system.0.lock().unwrap().insert(*key, *value)
///             }
///             StoreOp::Get { key } => system.0.lock().unwrap().get(key).copied(),
///         }
///     }
///     check(op, model, observed, checker) {
///         match op {
///             StoreOp::Put { .. } => true,
///             StoreOp::Get { key } => {
///                 checker.are_eq(
///                     &model.get(key).copied(),
///                     observed.returned().unwrap_or(&None),
///                     "read sees the latest write",
///                 );
///                 true
///             }
///         }
///     }
///     update(op, model) {
///         match op {
///             StoreOp::Put { key, value } => {
///                 let mut next = model.clone();
///                 next.insert(*key, *value);
///                 next
///             }
///             StoreOp::Get { .. } => model.clone(),
///         }
///     }
///     gen(keys: Vec<u8>) {
///         let puts = (carly::proptest::sample::select(keys.clone()), any::<u8>())
///             .prop_map(|(key, value)| StoreOp::Put { key, value });
///         let gets = carly::proptest::sample::select(keys.clone())
///             .prop_map(|key| StoreOp::Get { key });
///         prop_oneof![puts, gets].boxed()
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_ops {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident $({ $($field:ident : $fty:ty),* $(,)? })? ),* $(,)?
        }
        system: $system:ty;
        model: $model:ty;
        outcome: $outcome:ty;
        apply($aop:ident, $asys:ident) $apply:block
        $( check($cop:ident, $cmodel:ident, $cobs:ident, $cchecker:ident) $check:block )?
        $( update($uop:ident, $umodel:ident) $update:block )?
        $( gen($gctx:ident : $gty:ty) $gen:block )?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant $({ $($field : $fty),* })? ),*
        }

        impl $crate::Op for $name {
            type System = $system;
            type Model = $model;
            type Outcome = $outcome;

            fn apply(&self, $asys: &Self::System) -> Self::Outcome {
                let $aop = self;
                $apply
            }

            $(
                fn check(
                    &self,
                    $cmodel: &Self::Model,
                    $cobs: &$crate::Observed<Self::Outcome>,
                    $cchecker: &mut $crate::Checker,
                ) -> bool {
                    let $cop = self;
                    let verdict: bool = $check;
                    verdict && !$cchecker.failed()
                }
            )?

            $(
                fn next_model(&self, $umodel: &Self::Model) -> Self::Model {
                    let $uop = self;
                    $update
                }
            )?
        }

        $(
            impl $name {
                /// Random-argument generator for this operation set.
                $vis fn gen_args($gctx: &$gty) -> $crate::proptest::strategy::BoxedStrategy<$name> $gen
            }
        )?
    };
}
