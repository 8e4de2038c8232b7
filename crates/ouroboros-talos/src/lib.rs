// Ouroboros-Talos
//
// ESM-native development pipeline: alias resolution, per-package
// prebundling, import map merging and the dev server tying them together.
// The `talos` binary lives in ouroboros-talos-cli.

// Re-export main components
pub use ouroboros_talos_dev_server as dev_server;
pub use ouroboros_talos_importmap as importmap;
pub use ouroboros_talos_prebundle as prebundle;
pub use ouroboros_talos_resolver as resolver;
pub use ouroboros_talos_transform as transform;
