//! Non-recursive job graph traversal.
//!
//! Both traversals walk [JobNode::successors], i.e. dependents followed by nested children. Graphs can be deep and
//! wide, so neither uses recursion. Every hook that returns `bool` aborts the traversal when it returns `false`.

use std::collections::VecDeque;

use crate::{JobHandle, JobNode, JobTable, TraversalError};

///Identifies the [JobVisitor] hook that aborted a traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisitorHook {
    NoProcess,
    Pushed,
    Popped,
    Enqueued,
    Dequeued,
}

///Pluggable behavior of a traversal. [traverse_dfs] uses the push/pop hooks, [traverse_bfs] the enqueue/dequeue
/// hooks. Both consult [JobVisitor::can_process] before a job is expanded.
pub trait JobVisitor {
    ///Called once before the first job is visited. `job_count` is an upper bound on every handle index.
    fn on_begin(&mut self, _job_count: usize) {}
    fn on_end(&mut self) {}

    ///Whether `handle` may be expanded now. A job that can't be processed is handed to
    /// [JobVisitor::on_no_process] and skipped.
    fn can_process(&self, handle: JobHandle, node: &JobNode) -> bool;

    fn on_no_process(&mut self, _handle: JobHandle, _node: &JobNode) -> bool {
        true
    }

    fn on_pushed(&mut self, _handle: JobHandle, _node: &JobNode) -> bool {
        true
    }

    ///Called once all successors of a pushed job were handled.
    fn on_popped(&mut self, _handle: JobHandle, _node: &JobNode) -> bool {
        true
    }

    fn on_enqueued(&mut self, _handle: JobHandle, _node: &JobNode) -> bool {
        true
    }

    fn on_dequeued(&mut self, _handle: JobHandle, _node: &JobNode) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    handle: JobHandle,
    successors_pushed: bool,
}

fn check_root<'t>(table: &'t JobTable, root: JobHandle) -> Result<&'t JobNode, TraversalError> {
    if table.is_empty() {
        return Err(TraversalError::EmptyJobTable);
    }
    table.get(root).ok_or(TraversalError::InvalidRoot(root))
}

//Jobs on the stack or queue were validated when they got there.
fn queued<'t>(table: &'t JobTable, handle: JobHandle) -> Result<&'t JobNode, TraversalError> {
    table.get(handle).ok_or(TraversalError::VanishedJob(handle))
}

fn successor<'t>(
    table: &'t JobTable,
    from: JobHandle,
    to: JobHandle,
) -> Result<&'t JobNode, TraversalError> {
    table
        .get(to)
        .ok_or(TraversalError::DanglingEdge { from, to })
}

///Depth first traversal starting at `root`. Successors are visited in declaration order. A job is popped after all
/// of its successors were either popped or rejected.
pub fn traverse_dfs<V: JobVisitor>(
    table: &JobTable,
    root: JobHandle,
    visitor: &mut V,
) -> Result<(), TraversalError> {
    check_root(table, root)?;
    visitor.on_begin(table.len());

    let mut stack = vec![Frame {
        handle: root,
        successors_pushed: false,
    }];

    while let Some(&Frame {
        handle,
        successors_pushed,
    }) = stack.last()
    {
        let node = queued(table, handle)?;

        if successors_pushed {
            if !visitor.on_popped(handle, node) {
                return Err(TraversalError::Aborted {
                    job: handle,
                    hook: VisitorHook::Popped,
                });
            }
            stack.pop();
            continue;
        }

        if !visitor.can_process(handle, node) {
            if !visitor.on_no_process(handle, node) {
                return Err(TraversalError::Aborted {
                    job: handle,
                    hook: VisitorHook::NoProcess,
                });
            }
            stack.pop();
            continue;
        }

        if !visitor.on_pushed(handle, node) {
            return Err(TraversalError::Aborted {
                job: handle,
                hook: VisitorHook::Pushed,
            });
        }

        if let Some(top) = stack.last_mut() {
            top.successors_pushed = true;
        }
        //reversed, so the first successor ends up on top
        for next in node.successors().rev() {
            successor(table, handle, next)?;
            stack.push(Frame {
                handle: next,
                successors_pushed: false,
            });
        }
    }

    visitor.on_end();
    Ok(())
}

///Breadth first traversal starting at `root`. A job may be enqueued more than once. Visitors filter repeats in
/// [JobVisitor::can_process].
pub fn traverse_bfs<V: JobVisitor>(
    table: &JobTable,
    root: JobHandle,
    visitor: &mut V,
) -> Result<(), TraversalError> {
    let root_node = check_root(table, root)?;
    visitor.on_begin(table.len());

    let mut queue = VecDeque::new();
    if !visitor.on_enqueued(root, root_node) {
        return Err(TraversalError::Aborted {
            job: root,
            hook: VisitorHook::Enqueued,
        });
    }
    queue.push_back(root);

    while let Some(handle) = queue.pop_front() {
        let node = queued(table, handle)?;

        if !visitor.can_process(handle, node) {
            if !visitor.on_no_process(handle, node) {
                return Err(TraversalError::Aborted {
                    job: handle,
                    hook: VisitorHook::NoProcess,
                });
            }
            continue;
        }

        if !visitor.on_dequeued(handle, node) {
            return Err(TraversalError::Aborted {
                job: handle,
                hook: VisitorHook::Dequeued,
            });
        }

        for next in node.successors() {
            let next_node = successor(table, handle, next)?;
            if !visitor.on_enqueued(next, next_node) {
                return Err(TraversalError::Aborted {
                    job: next,
                    hook: VisitorHook::Enqueued,
                });
            }
            queue.push_back(next);
        }
    }

    visitor.on_end();
    Ok(())
}

///Collects every job reachable from the traversal root exactly once, in breadth first order.
pub(crate) struct ChildJobAccumulator {
    visited: Vec<bool>,
    jobs: Vec<JobHandle>,
}

impl ChildJobAccumulator {
    pub(crate) fn new(job_count: usize) -> Self {
        ChildJobAccumulator {
            visited: vec![false; job_count],
            jobs: Vec::new(),
        }
    }

    pub(crate) fn into_jobs(self) -> Vec<JobHandle> {
        self.jobs
    }
}

impl JobVisitor for ChildJobAccumulator {
    fn on_begin(&mut self, job_count: usize) {
        if self.visited.len() < job_count {
            self.visited.resize(job_count, false);
        }
    }

    fn can_process(&self, handle: JobHandle, _node: &JobNode) -> bool {
        !self.visited.get(handle.index()).copied().unwrap_or(true)
    }

    fn on_dequeued(&mut self, handle: JobHandle, _node: &JobNode) -> bool {
        self.visited[handle.index()] = true;
        self.jobs.push(handle);
        true
    }
}
