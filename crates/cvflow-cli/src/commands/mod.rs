pub mod actions;
pub mod run;
pub mod show_graph;
