/// Create a new process-unique id type.
#[macro_export(local_inner_macros)]
macro_rules! unique_id_type {
    ($name:ident) => {
        /// Process-unique id.
        #[derive(Copy, Clone, Hash, PartialEq, Eq, Debug, PartialOrd, Ord)]
        pub struct $name {
            value: usize,
        }

        impl $name {
            /// Create a new ID.
            pub fn new() -> Self {
                use core::sync::atomic::{AtomicUsize, Ordering};

                static COUNTER: AtomicUsize = AtomicUsize::new(0);

                let value = COUNTER.fetch_add(1, Ordering::Relaxed);
                if value == usize::MAX {
                    core::panic!("Id overflowed");
                }
                Self { value }
            }

            /// The raw value.
            pub fn value(&self) -> usize {
                self.value
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::write!(f, "{}", self.value)
            }
        }
    };
}

unique_id_type!(CandidateId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = CandidateId::new();
        let b = CandidateId::new();

        assert_ne!(a, b);
        assert!(b.value() > a.value());
    }
}
