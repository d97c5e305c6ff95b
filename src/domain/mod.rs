// Domain layer: condition trees, attribute vocabulary, templates, policies

pub mod attribute;
pub mod condition;
pub mod policy;
pub mod template;
