// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Order preserving instance filtering.
//!
//! The slice form borrows from its input whenever the retained elements form a single
//! contiguous run, which covers retaining nothing and retaining everything. Only two or more
//! separate runs cause an allocation.

use std::{borrow::Cow, ops::Range, sync::Arc};

use crate::model::{Application, Instance};

/// Returns the elements of `items` matching `predicate`, in order.
///
/// `predicate` is called exactly once per element.
pub fn filter_slice<'a, T, P>(items: &'a [T], mut predicate: P) -> Cow<'a, [T]>
where
    T: Clone,
    P: FnMut(&T) -> bool,
{
    // First run of matches, extended while matches stay adjacent.
    let mut run: Option<Range<usize>> = None;
    // Set once a second run starts.
    let mut copied: Option<Vec<T>> = None;

    for (i, item) in items.iter().enumerate() {
        if !predicate(item) {
            continue;
        }
        if let Some(out) = copied.as_mut() {
            out.push(item.clone());
            continue;
        }
        match run.as_mut() {
            None => run = Some(i..i + 1),
            Some(r) if r.end == i => r.end += 1,
            Some(r) => {
                let mut out = Vec::with_capacity(r.len() + items.len() - i);
                out.extend_from_slice(&items[r.clone()]);
                out.push(item.clone());
                copied = Some(out);
            }
        }
    }

    match (copied, run) {
        (Some(out), _) => Cow::Owned(out),
        (None, Some(r)) => Cow::Borrowed(&items[r]),
        (None, None) => Cow::Borrowed(&items[..0]),
    }
}

/// Owned counterpart of [`filter_slice`]. Retains matches in place, without cloning.
pub fn filter_vec<T, P>(mut items: Vec<T>, predicate: P) -> Vec<T>
where
    P: FnMut(&T) -> bool,
{
    items.retain(predicate);
    items
}

/// Returns the instances of all `applications` matching `predicate`, in order.
///
/// A single application is filtered with [`filter_slice`]. Matches across several applications
/// are always collected into a new vector.
pub fn filter_applications<'a, P>(
    applications: &'a [Application],
    mut predicate: P,
) -> Cow<'a, [Arc<Instance>]>
where
    P: FnMut(&Instance) -> bool,
{
    match applications {
        [] => Cow::Borrowed(&[]),
        [app] => filter_slice(&app.instances, |i| predicate(i)),
        apps => {
            let total = apps.iter().map(|a| a.instances.len()).sum();
            let mut out = Vec::with_capacity(total);
            for app in apps {
                out.extend(app.instances.iter().filter(|i| predicate(i)).cloned());
            }
            Cow::Owned(out)
        }
    }
}

/// Owned counterpart of [`filter_applications`].
pub fn filter_applications_owned<P>(
    mut applications: Vec<Application>,
    mut predicate: P,
) -> Vec<Arc<Instance>>
where
    P: FnMut(&Instance) -> bool,
{
    match applications.len() {
        0 => Vec::new(),
        1 => {
            let app = applications.swap_remove(0);
            filter_vec(app.instances, |i| predicate(i))
        }
        _ => {
            let total = applications.iter().map(|a| a.instances.len()).sum();
            let mut out = Vec::with_capacity(total);
            for app in applications {
                out.extend(app.instances.into_iter().filter(|i| predicate(i)));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts clones, so tests can assert that nothing was copied.
    #[derive(Debug)]
    struct Tracked {
        value: u32,
        clones: Arc<AtomicUsize>,
    }

    impl Clone for Tracked {
        fn clone(&self) -> Self {
            self.clones.fetch_add(1, Ordering::SeqCst);
            Self {
                value: self.value,
                clones: self.clones.clone(),
            }
        }
    }

    fn tracked(values: &[u32]) -> (Vec<Tracked>, Arc<AtomicUsize>) {
        let clones = Arc::new(AtomicUsize::new(0));
        let items = values
            .iter()
            .map(|&value| {
                Tracked {
                    value,
                    clones: clones.clone(),
                }
            })
            .collect();
        (items, clones)
    }

    fn values(items: &[Tracked]) -> Vec<u32> {
        items.iter().map(|t| t.value).collect()
    }

    /// Filters `input` keeping odd values and checks the result and whether it borrowed.
    fn check(input: &[u32], expected: &[u32], borrowed: bool) {
        let (items, clones) = tracked(input);
        let mut calls = 0;
        let res = filter_slice(&items, |t| {
            calls += 1;
            t.value % 2 == 1
        });

        assert_eq!(calls, input.len(), "predicate calls for {input:?}");
        assert_eq!(values(&res), expected, "result for {input:?}");
        assert_eq!(
            matches!(res, Cow::Borrowed(_)),
            borrowed,
            "borrowed for {input:?}"
        );
        if borrowed {
            assert_eq!(clones.load(Ordering::SeqCst), 0);
            if let Some(first) = res.first() {
                let offset = items.iter().position(|t| t.value == first.value).unwrap();
                assert!(std::ptr::eq(first, &items[offset]));
            }
        }
    }

    mod distributions {
        use super::*;

        #[test]
        fn empty_input() {
            check(&[], &[], true);
        }

        #[test]
        fn no_matches() {
            check(&[2, 4, 6], &[], true);
        }

        #[test]
        fn all_match() {
            check(&[1, 3, 5], &[1, 3, 5], true);
        }

        #[test]
        fn single_run_at_start() {
            check(&[1, 3, 4, 6], &[1, 3], true);
        }

        #[test]
        fn single_run_in_middle() {
            check(&[2, 1, 3, 5, 4], &[1, 3, 5], true);
        }

        #[test]
        fn single_run_at_end() {
            check(&[2, 4, 5, 7], &[5, 7], true);
        }

        #[test]
        fn single_element_run() {
            check(&[2, 3, 4], &[3], true);
        }

        #[test]
        fn two_runs() {
            check(&[1, 2, 3], &[1, 3], false);
        }

        #[test]
        fn many_runs() {
            check(&[2, 1, 1, 2, 3, 2, 5, 7, 2], &[1, 1, 3, 5, 7], false);
        }
    }

    #[test]
    fn disjoint_runs_clone_only_matches() {
        let (items, clones) = tracked(&[1, 2, 3, 4, 5]);
        let res = filter_slice(&items, |t| t.value % 2 == 1);
        assert_eq!(values(&res), [1, 3, 5]);
        assert_eq!(clones.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn owned_filter_does_not_clone() {
        let (items, clones) = tracked(&[2, 1, 3, 4, 5]);
        let res = filter_vec(items, |t| t.value % 2 == 1);
        assert_eq!(values(&res), [1, 3, 5]);
        assert_eq!(clones.load(Ordering::SeqCst), 0);
    }

    mod applications {
        use super::*;
        use crate::model::StatusType;

        fn app(name: &str, statuses: &[StatusType]) -> Application {
            Application {
                name: name.to_string(),
                instances: statuses
                    .iter()
                    .enumerate()
                    .map(|(i, status)| {
                        Arc::new(Instance {
                            host_name: format!("{name}-{i}"),
                            status: *status,
                            ..Default::default()
                        })
                    })
                    .collect(),
            }
        }

        fn is_up(i: &Instance) -> bool {
            i.status == StatusType::Up
        }

        #[test]
        fn no_applications() {
            let res = filter_applications(&[], is_up);
            assert!(res.is_empty());
            assert!(filter_applications_owned(vec![], is_up).is_empty());
        }

        #[test]
        fn single_application_borrows() {
            use StatusType::*;
            let apps = vec![app("A", &[Down, Up, Up, Starting])];
            let res = filter_applications(&apps, is_up);
            let Cow::Borrowed(slice) = res else {
                panic!("expected a borrowed result");
            };
            assert_eq!(slice.len(), 2);
            assert!(Arc::ptr_eq(&slice[0], &apps[0].instances[1]));
            assert!(std::ptr::eq(slice.as_ptr(), apps[0].instances[1..].as_ptr()));
        }

        #[test]
        fn several_applications_are_collected() {
            use StatusType::*;
            let apps = vec![app("A", &[Up, Down]), app("B", &[Up, Up])];
            let res = filter_applications(&apps, is_up);
            assert!(matches!(res, Cow::Owned(_)));
            let hosts: Vec<_> = res.iter().map(|i| i.host_name.as_str()).collect();
            assert_eq!(hosts, ["A-0", "B-0", "B-1"]);

            let owned = filter_applications_owned(apps.clone(), is_up);
            assert_eq!(owned.as_slice(), &*res);
            assert!(Arc::ptr_eq(&owned[1], &apps[1].instances[0]));
        }
    }
}
