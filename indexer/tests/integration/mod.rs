mod indexer_job_test;
mod save_point_test;
mod scheduler_test;
