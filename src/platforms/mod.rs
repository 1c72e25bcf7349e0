pub mod hotmart;
