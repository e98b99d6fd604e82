mod run;
mod store;
mod types;

pub(crate) use run::run;
