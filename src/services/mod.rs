pub mod viewer_registry;
