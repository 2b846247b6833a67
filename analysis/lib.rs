#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
#![allow(non_snake_case)]

pub mod compare;
pub mod config;
pub mod data;
pub mod design;
pub mod fit;
pub mod formula;
pub mod kfold;
pub mod output;
pub mod pipeline;
pub mod posterior;
pub mod sampler;
pub mod select;
pub mod service;
pub mod summary;
