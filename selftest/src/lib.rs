/*!

Test support for `rfstack`: a scripted [`CommandRunner`](rfstack_model::CommandRunner) that
stands in for every external program, and a throwaway host layout to run the workflows against.

!*/

mod fixture;
mod runner;

pub use fixture::*;
pub use runner::{failure, output, ScriptedRunner};
