pub mod boundary;
pub mod config;
pub mod mediator;
pub mod model;
pub mod num;
pub mod particle;
pub mod random_walk;
pub mod reader;
pub mod seeding;
pub mod simulator;
pub mod synthetic;

pub use config::load_config;
pub use config::RunConfig;
pub use mediator::FieldSnapshot;
pub use mediator::GridArrays;
pub use mediator::InMemoryMediator;
pub use mediator::Mediator;
pub use model::Model;
pub use model::ModelBuilder;
pub use particle::Particle;
pub use reader::DataReader;
pub use seeding::SeedArrays;
