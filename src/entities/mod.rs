pub mod design;
pub mod fabric;
pub mod garment_template;
pub mod order;
pub mod order_fabric;
pub mod tailor_assignment;
