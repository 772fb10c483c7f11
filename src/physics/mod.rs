pub mod velocity;
