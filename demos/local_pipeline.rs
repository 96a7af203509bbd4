use ring_matvec::comm::{Communicator, LocalWorld};
use ring_matvec::matrix::{ColumnVector, Matrix};
use ring_matvec::pipeline::{run_rank, Input, PipelineOptions};
use ring_matvec::report::Reporter;

fn main() {
    env_logger::init();

    // Rows 0-1 are computed by rank 0, rows 2-3 by rank 1
    let matrix = Matrix::from_rows(vec![
        vec![1, 2, 3, 4],
        vec![5, 6, 7, 8],
        vec![9, 10, 11, 12],
        vec![13, 14, 15, 16],
    ])
    .unwrap();
    let input = Input::new(matrix, ColumnVector::new(vec![1, 0, 1, 0]));

    let outcomes = LocalWorld::run(2, |comm| {
        let input = (comm.rank() == 0).then(|| input.clone());
        let mut reporter = Reporter::stdout(comm.rank() as usize);
        run_rank(comm, input, &PipelineOptions::default(), &mut reporter)
    })
    .unwrap();

    for outcome in &outcomes {
        println!(
            "Rank {} computed rows {}..{}, holding {:?}",
            outcome.rank, outcome.stripe.start, outcome.stripe.end, outcome.results
        );
    }
    assert_eq!(outcomes[0].final_results, Some(vec![4, 12, 20, 28]));
}
