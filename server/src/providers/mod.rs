pub mod gtfs_rt;
