//! End-to-end sync scenarios against in-process collaborators.

mod support;

mod sync_runs;
