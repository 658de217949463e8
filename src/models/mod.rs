pub mod checkpoint;
pub mod dead_letter;
pub mod identity;
pub mod product;
pub mod run;
pub mod work_item;
