pub mod backend;
pub mod bulk;
pub mod client;
pub mod common;
pub mod group;
pub mod model;
pub mod region;
pub mod server;

// Generated gRPC code
pub mod proto {
    pub mod common {
        tonic::include_proto!("flamestore.common");
    }

    pub mod master {
        tonic::include_proto!("flamestore.master");
    }

    pub mod region {
        tonic::include_proto!("flamestore.region");
    }

    pub mod group {
        tonic::include_proto!("flamestore.group");
    }

    pub mod bulk {
        tonic::include_proto!("flamestore.bulk");
    }
}
